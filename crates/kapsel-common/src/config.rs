//! Global configuration model for the runtime.
//!
//! Every on-disk location is derived from a single root directory so that
//! tests and alternate installations can relocate the whole state tree.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// What to do when a cgroup subsystem driver fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CgroupPolicy {
    /// Log the failure and keep going; the container runs without that limit.
    #[default]
    BestEffort,
    /// Abort the container start.
    Strict,
}

/// Root configuration for the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base directory for all state.
    pub root: PathBuf,
    /// Filesystem type used for the union mount.
    pub overlay_driver: String,
    /// Failure policy for cgroup subsystem drivers.
    pub cgroup_policy: CgroupPolicy,
}

impl RuntimeConfig {
    /// Creates a configuration rooted at `root` with default policies.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overlay_driver: constants::DEFAULT_OVERLAY_DRIVER.to_string(),
            cgroup_policy: CgroupPolicy::BestEffort,
        }
    }

    /// Builds the configuration from the process environment.
    ///
    /// `root` wins over `KAPSEL_ROOT` when given.
    #[must_use]
    pub fn from_env(root: Option<PathBuf>) -> Self {
        let root = root
            .or_else(|| std::env::var_os(constants::ROOT_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_ROOT));
        let mut config = Self::with_root(root);
        if let Ok(driver) = std::env::var(constants::DRIVER_TYPE_ENV) {
            if !driver.is_empty() {
                config.overlay_driver = driver;
            }
        }
        if std::env::var(constants::CGROUP_STRICT_ENV).is_ok_and(|v| v == "1" || v == "true") {
            config.cgroup_policy = CgroupPolicy::Strict;
        }
        tracing::debug!(root = %config.root.display(), driver = %config.overlay_driver, "runtime configuration loaded");
        config
    }

    /// Directory holding one metadata directory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("containers")
    }

    /// Metadata directory of a single container.
    #[must_use]
    pub fn container_dir(&self, container_id: &str) -> PathBuf {
        self.containers_dir().join(container_id)
    }

    /// Path of a container's JSON record.
    #[must_use]
    pub fn container_record(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id).join(constants::CONFIG_NAME)
    }

    /// Path of a detached container's log file.
    #[must_use]
    pub fn container_log(&self, container_id: &str) -> PathBuf {
        self.container_dir(container_id)
            .join(constants::log_file_name(container_id))
    }

    /// Directory holding image tarballs.
    #[must_use]
    pub fn image_dir(&self) -> PathBuf {
        self.root.join("image")
    }

    /// Tarball path for a named image.
    #[must_use]
    pub fn image_archive(&self, image: &str) -> PathBuf {
        self.image_dir().join(format!("{image}.tar"))
    }

    /// Directory holding per-container overlay roots.
    #[must_use]
    pub fn overlay_dir(&self) -> PathBuf {
        self.root.join("overlay2")
    }

    /// Directory holding one JSON file per network.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.root.join("network").join("network")
    }

    /// The IPAM bitmap table.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.root.join("network").join("ipam").join("subnet.json")
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::with_root(constants::DEFAULT_ROOT)
    }
}
