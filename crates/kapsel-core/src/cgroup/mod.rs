//! Cgroups v1 resource management.
//!
//! Every v1 subsystem lives on its own hierarchy, so limits are applied by
//! a set of independent [`Subsystem`] drivers, one per controller. The
//! [`CgroupManager`] fans each lifecycle call out to all of them.

pub mod cpu;
pub mod cpuset;
pub mod hierarchy;
pub mod memory;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use kapsel_common::config::CgroupPolicy;
use kapsel_common::error::{KapselError, Result};
use kapsel_common::types::ResourceConfig;

pub use hierarchy::Hierarchy;

/// Control file that moves a task into a v1 cgroup.
pub const CGROUP_TASKS: &str = "tasks";

/// A single cgroup v1 controller.
pub trait Subsystem: Send + Sync {
    /// Controller name as it appears in mountinfo options.
    fn name(&self) -> &'static str;

    /// Creates the group if needed and writes the configured limits.
    ///
    /// A config that does not concern this controller is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing or a control file
    /// cannot be written.
    fn set(&self, cgroup_path: &Path, resources: &ResourceConfig) -> Result<()>;

    /// Moves `pid` into the group.
    ///
    /// # Errors
    ///
    /// Returns an error if the `tasks` file cannot be written.
    fn apply(&self, cgroup_path: &Path, pid: u32, resources: &ResourceConfig) -> Result<()>;

    /// Removes the group directory. A group that does not exist is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is missing or the directory cannot
    /// be removed.
    fn remove(&self, cgroup_path: &Path) -> Result<()>;
}

/// Writes `value` into a cgroup control file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_cgroup_file(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| KapselError::io(path, e))?;
    tracing::trace!(path = %path.display(), value, "cgroup file written");
    Ok(())
}

/// Adds `pid` to the group at `dir`.
///
/// # Errors
///
/// Returns an error if the `tasks` file cannot be written.
pub fn write_task(dir: &Path, pid: u32) -> Result<()> {
    write_cgroup_file(&dir.join(CGROUP_TASKS), &pid.to_string())
}

/// Removes a group directory.
///
/// On cgroupfs, `rmdir` is the only valid removal since the control files
/// cannot be unlinked. Plain directories that still hold files fall back to
/// a recursive removal.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub fn remove_cgroup_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
            std::fs::remove_dir_all(dir).map_err(|e| KapselError::io(dir, e))
        }
        Err(e) => Err(KapselError::io(dir, e)),
    }
}

/// Removes a group from `subsystem`'s hierarchy if it exists.
fn remove_from(hierarchy: &Hierarchy, subsystem: &str, cgroup_path: &Path) -> Result<()> {
    let dir = hierarchy.cgroup_path(subsystem, cgroup_path, false)?;
    remove_cgroup_dir(&dir)?;
    tracing::debug!(subsystem, path = %dir.display(), "cgroup removed");
    Ok(())
}

/// Joins `pid` to a group that `set` already created.
fn apply_to(hierarchy: &Hierarchy, subsystem: &str, cgroup_path: &Path, pid: u32) -> Result<()> {
    let dir = hierarchy.cgroup_path(subsystem, cgroup_path, false)?;
    write_task(&dir, pid)
}

/// Handle to one container's cgroup across all registered subsystems.
pub struct CgroupManager {
    path: PathBuf,
    resources: ResourceConfig,
    subsystems: Vec<Box<dyn Subsystem>>,
    policy: CgroupPolicy,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager")
            .field("path", &self.path)
            .field("resources", &self.resources)
            .field(
                "subsystems",
                &self.subsystems.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .finish()
    }
}

impl CgroupManager {
    /// Creates a manager for `path` (relative to each hierarchy root) with
    /// the cpu, cpuset, and memory drivers.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        resources: ResourceConfig,
        hierarchy: &Hierarchy,
        policy: CgroupPolicy,
    ) -> Self {
        let subsystems: Vec<Box<dyn Subsystem>> = vec![
            Box::new(cpuset::CpusetSubsystem::new(hierarchy.clone())),
            Box::new(memory::MemorySubsystem::new(hierarchy.clone())),
            Box::new(cpu::CpuSubsystem::new(hierarchy.clone())),
        ];
        Self::with_subsystems(path, resources, subsystems, policy)
    }

    /// Creates a manager over an explicit driver list.
    #[must_use]
    pub fn with_subsystems(
        path: impl Into<PathBuf>,
        resources: ResourceConfig,
        subsystems: Vec<Box<dyn Subsystem>>,
        policy: CgroupPolicy,
    ) -> Self {
        Self {
            path: path.into(),
            resources,
            subsystems,
            policy,
        }
    }

    /// The group path relative to each hierarchy root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes limits through every driver.
    ///
    /// # Errors
    ///
    /// Under [`CgroupPolicy::Strict`], returns the first driver failure.
    /// Otherwise failures are logged and `Ok` is returned.
    pub fn set(&self) -> Result<()> {
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.set(&self.path, &self.resources) {
                self.handle_failure(subsystem.name(), "set", e)?;
            }
        }
        Ok(())
    }

    /// Moves `pid` into the group in every driver that has limits to apply.
    ///
    /// # Errors
    ///
    /// Under [`CgroupPolicy::Strict`], returns the first driver failure.
    pub fn apply(&self, pid: u32) -> Result<()> {
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.apply(&self.path, pid, &self.resources) {
                self.handle_failure(subsystem.name(), "apply", e)?;
            }
        }
        tracing::info!(pid, path = %self.path.display(), "process placed in cgroup");
        Ok(())
    }

    /// Removes the group from every hierarchy. Failures are logged only.
    pub fn destroy(&self) {
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.remove(&self.path) {
                tracing::warn!(subsystem = subsystem.name(), error = %e, "failed to remove cgroup");
            }
        }
        tracing::debug!(path = %self.path.display(), "cgroup destroyed");
    }

    fn handle_failure(&self, subsystem: &str, op: &str, err: KapselError) -> Result<()> {
        match self.policy {
            CgroupPolicy::Strict => Err(err),
            CgroupPolicy::BestEffort => {
                tracing::error!(subsystem, op, error = %err, "cgroup subsystem failed, continuing");
                Ok(())
            }
        }
    }
}
