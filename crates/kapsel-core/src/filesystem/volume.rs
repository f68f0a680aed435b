//! Host directories bind-mounted into a container.

use std::path::{Component, Path, PathBuf};

use kapsel_common::error::{KapselError, Result};

use super::mounter::Mounter;

/// A parsed `hostPath:containerPath` volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Absolute path as seen inside the container.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parses `hostPath:containerPath`.
    ///
    /// # Errors
    ///
    /// Returns an error unless there are exactly two non-empty absolute
    /// parts and the container path stays below the container root.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let [host, container] = parts.as_slice() else {
            return Err(KapselError::config(format!(
                "volume `{spec}` must be hostPath:containerPath"
            )));
        };
        let (host, container) = (Path::new(host), Path::new(container));
        if !host.is_absolute() || !container.is_absolute() {
            return Err(KapselError::config(format!(
                "volume `{spec}` must use absolute paths on both sides"
            )));
        }
        if !stays_below_root(container) {
            return Err(KapselError::config(format!(
                "volume `{spec}` container path must name a directory below `/` without `..`"
            )));
        }
        Ok(Self {
            host: host.to_path_buf(),
            container: container.to_path_buf(),
        })
    }

    /// Parses an optional spec where the empty string means "no volume".
    ///
    /// # Errors
    ///
    /// Returns an error if a non-empty spec is invalid.
    pub fn parse_optional(spec: &str) -> Result<Option<Self>> {
        if spec.is_empty() {
            return Ok(None);
        }
        Self::parse(spec).map(Some)
    }

    /// The mount point for this volume under a container root.
    #[must_use]
    pub fn target_in(&self, root: &Path) -> PathBuf {
        root.join(self.container.strip_prefix("/").unwrap_or(&self.container))
    }

    /// Creates both ends and bind-mounts the host directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the bind mount
    /// fails.
    pub fn mount(&self, root: &Path, mounter: &dyn Mounter) -> Result<()> {
        std::fs::create_dir_all(&self.host).map_err(|e| KapselError::io(&self.host, e))?;
        let target = self.target_in(root);
        std::fs::create_dir_all(&target).map_err(|e| KapselError::io(&target, e))?;
        mounter.bind(&self.host, &target)?;
        tracing::info!(
            host = %self.host.display(),
            container = %self.container.display(),
            "volume mounted"
        );
        Ok(())
    }

    /// Unmounts the volume from under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    pub fn unmount(&self, root: &Path, mounter: &dyn Mounter) -> Result<()> {
        mounter.unmount(&self.target_in(root))
    }
}

/// True if `path` is `/` followed by at least one plain component.
fn stays_below_root(path: &Path) -> bool {
    let mut components = path.components();
    components.next() == Some(Component::RootDir)
        && components.clone().next().is_some()
        && components.all(|c| matches!(c, Component::Normal(_)))
}

impl std::fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}
