//! Per-container copy-on-write workspaces built on `OverlayFS`.
//!
//! Layout under the overlay directory:
//!
//! ```text
//! <overlay dir>/<id>/lower    image contents, extracted once
//!                   /upper    container writes
//!                   /work     overlay scratch space
//!                   /merged   the union, used as the container root
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kapsel_common::config::RuntimeConfig;
use kapsel_common::error::{KapselError, Result};

use super::mounter::Mounter;
use super::volume::VolumeSpec;

/// Directory paths of one container's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// The workspace root, `<overlay dir>/<id>`.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read-only image layer.
    #[must_use]
    pub fn lower(&self) -> PathBuf {
        self.root.join("lower")
    }

    /// Writable layer.
    #[must_use]
    pub fn upper(&self) -> PathBuf {
        self.root.join("upper")
    }

    /// Overlay work directory.
    #[must_use]
    pub fn work(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Union mount point and container root.
    #[must_use]
    pub fn merged(&self) -> PathBuf {
        self.root.join("merged")
    }

    /// Mount options for the union.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower().display(),
            self.upper().display(),
            self.work().display()
        )
    }
}

/// Creates and tears down container workspaces.
pub struct OverlayManager {
    overlay_dir: PathBuf,
    image_dir: PathBuf,
    fstype: String,
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for OverlayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayManager")
            .field("overlay_dir", &self.overlay_dir)
            .field("image_dir", &self.image_dir)
            .field("fstype", &self.fstype)
            .finish_non_exhaustive()
    }
}

impl OverlayManager {
    /// Creates a manager using the directories and filesystem type from
    /// `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            overlay_dir: config.overlay_dir(),
            image_dir: config.image_dir(),
            fstype: config.overlay_driver.clone(),
            mounter,
        }
    }

    /// Layout of `container_id`'s workspace. Nothing is created.
    #[must_use]
    pub fn layout(&self, container_id: &str) -> WorkspaceLayout {
        WorkspaceLayout {
            root: self.overlay_dir.join(container_id),
        }
    }

    /// Builds the workspace: extracts the image into `lower` unless it is
    /// already there, creates `upper`, `work` and `merged`, mounts the
    /// union, then mounts the volume if one is given.
    ///
    /// On failure everything created by this call is removed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be extracted or a mount fails.
    pub fn create(
        &self,
        container_id: &str,
        image: &str,
        volume: Option<&VolumeSpec>,
    ) -> Result<WorkspaceLayout> {
        let layout = self.layout(container_id);

        if let Err(e) = self.prepare(&layout, image) {
            self.remove_dirs(&layout, true);
            return Err(e);
        }

        if let Err(e) = self
            .mounter
            .mount_union(&self.fstype, &layout.mount_options(), &layout.merged())
        {
            self.remove_dirs(&layout, true);
            return Err(e);
        }

        if let Some(volume) = volume {
            if let Err(e) = volume.mount(&layout.merged(), self.mounter.as_ref()) {
                let unmounted = self.mounter.unmount(&layout.merged()).is_ok();
                self.remove_dirs(&layout, unmounted);
                return Err(e);
            }
        }

        tracing::info!(
            container_id,
            image,
            merged = %layout.merged().display(),
            "workspace created"
        );
        Ok(layout)
    }

    /// Tears the workspace down: volume first, then the union, then every
    /// directory including the workspace root.
    ///
    /// Unmount failures are logged and do not stop the removal. If the
    /// union could not be unmounted, `merged` is only removed when empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspace root cannot be removed.
    pub fn delete(&self, container_id: &str, volume: Option<&VolumeSpec>) -> Result<()> {
        let layout = self.layout(container_id);
        let merged = layout.merged();

        if let Some(volume) = volume {
            if let Err(e) = volume.unmount(&merged, self.mounter.as_ref()) {
                tracing::warn!(container_id, volume = %volume, error = %e, "failed to unmount volume");
            }
        }

        let unmounted = match self.mounter.unmount(&merged) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(container_id, error = %e, "failed to unmount workspace");
                false
            }
        };

        self.remove_dirs(&layout, unmounted);
        match std::fs::remove_dir(layout.root()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(KapselError::io(layout.root(), e)),
        }
        tracing::info!(container_id, "workspace deleted");
        Ok(())
    }

    fn prepare(&self, layout: &WorkspaceLayout, image: &str) -> Result<()> {
        let lower = layout.lower();
        if lower.exists() {
            tracing::debug!(lower = %lower.display(), "lower layer present, skipping extraction");
        } else {
            let archive = self.image_dir.join(format!("{image}.tar"));
            if !archive.exists() {
                return Err(KapselError::NotFound {
                    kind: "image",
                    id: image.to_string(),
                });
            }
            if let Err(e) = kapsel_image::archive::extract(&archive, &lower) {
                let _ = std::fs::remove_dir_all(&lower);
                return Err(e);
            }
        }

        for dir in [layout.upper(), layout.work(), layout.merged()] {
            std::fs::create_dir_all(&dir).map_err(|e| KapselError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Removes the workspace directories, logging failures.
    ///
    /// `merged` is only removed recursively when the union is known to be
    /// unmounted.
    fn remove_dirs(&self, layout: &WorkspaceLayout, merged_unmounted: bool) {
        let merged = layout.merged();
        let merged_result = if merged_unmounted {
            std::fs::remove_dir_all(&merged)
        } else {
            std::fs::remove_dir(&merged)
        };
        log_removal(&merged, merged_result);

        for dir in [layout.upper(), layout.work(), layout.lower()] {
            let result = std::fs::remove_dir_all(&dir);
            log_removal(&dir, result);
        }
        tracing::debug!(root = %layout.root().display(), fstype = %self.fstype, "workspace directories removed");
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove directory"),
    }
}
