//! Packing a container root back into an image.

use std::fs::File;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use kapsel_common::error::{KapselError, Result};

/// Writes a gzip-compressed tarball of `source_dir` to `archive_path`.
///
/// Entries are stored relative to `source_dir`. Symlinks are archived as
/// links. An existing archive is replaced with a warning.
///
/// # Errors
///
/// Returns an error if `source_dir` is missing or the archive cannot be
/// written.
pub fn commit(source_dir: &Path, archive_path: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(KapselError::NotFound {
            kind: "container root",
            id: source_dir.display().to_string(),
        });
    }
    if archive_path.exists() {
        tracing::warn!(archive = %archive_path.display(), "image already exists, overwriting");
    }
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KapselError::io(parent, e))?;
    }

    let file = File::create(archive_path).map_err(|e| KapselError::io(archive_path, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", source_dir)
        .map_err(|e| KapselError::io(source_dir, e))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| KapselError::io(archive_path, e))?;
    let _ = encoder
        .finish()
        .map_err(|e| KapselError::io(archive_path, e))?;

    tracing::info!(
        source = %source_dir.display(),
        archive = %archive_path.display(),
        "container committed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_image_extracts_back() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("merged");
        std::fs::create_dir_all(merged.join("etc")).unwrap();
        std::fs::write(merged.join("etc/hostname"), "box").unwrap();

        let archive = dir.path().join("image/snap.tar");
        commit(&merged, &archive).unwrap();

        let out = dir.path().join("out");
        crate::archive::extract(&archive, &out).unwrap();
        assert_eq!(
            std::fs::read_to_string(out.join("etc/hostname")).unwrap(),
            "box"
        );
    }

    #[test]
    fn overwrites_existing_image() {
        let dir = tempfile::tempdir().unwrap();
        let merged = dir.path().join("merged");
        std::fs::create_dir_all(&merged).unwrap();
        let archive = dir.path().join("snap.tar");
        std::fs::write(&archive, "stale").unwrap();

        commit(&merged, &archive).unwrap();
        let bytes = std::fs::read(&archive).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = commit(&dir.path().join("gone"), &dir.path().join("x.tar")).unwrap_err();
        assert!(matches!(err, KapselError::NotFound { .. }));
    }
}
