//! Image archive extraction.
//!
//! Compression is detected from the first two bytes rather than the file
//! extension, since every image is stored as `<name>.tar` whether or not it
//! was gzipped.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use kapsel_common::error::{KapselError, Result};

/// gzip member header magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Unpacks `archive_path` into `target`, creating `target` first.
///
/// Permission bits recorded in the archive are preserved, setuid included.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or unpacked.
pub fn extract(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting image"
    );

    std::fs::create_dir_all(target).map_err(|e| KapselError::io(target, e))?;
    let mut file = File::open(archive_path).map_err(|e| KapselError::io(archive_path, e))?;

    if is_gzip(&mut file).map_err(|e| KapselError::io(archive_path, e))? {
        unpack(flate2::read::GzDecoder::new(BufReader::new(file)), target)?;
    } else {
        unpack(BufReader::new(file), target)?;
    }

    tracing::debug!(target = %target.display(), "image extracted");
    Ok(())
}

fn unpack<R: Read>(reader: R, target: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(target).map_err(|e| KapselError::io(target, e))
}

/// Peeks at the magic bytes and rewinds.
fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e),
    };
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(gzip)
}
