//! CPU pinning through the v1 `cpuset` controller.

use std::path::Path;

use kapsel_common::error::{KapselError, Result};
use kapsel_common::types::ResourceConfig;

use super::{Hierarchy, Subsystem, apply_to, remove_from, write_cgroup_file};

const CGROUP_CPUSET_CPUS: &str = "cpuset.cpus";
const CGROUP_CPUSET_MEMS: &str = "cpuset.mems";

/// Driver for the `cpuset` hierarchy.
#[derive(Debug, Clone)]
pub struct CpusetSubsystem {
    hierarchy: Hierarchy,
}

impl CpusetSubsystem {
    /// Creates the driver over `hierarchy`.
    #[must_use]
    pub const fn new(hierarchy: Hierarchy) -> Self {
        Self { hierarchy }
    }

    /// Copies `interface_file` down from the hierarchy root into every
    /// group along `cgroup_path` whose value is still empty.
    ///
    /// A new cpuset group starts with empty `cpus` and `mems`, and the
    /// kernel refuses tasks (`ENOSPC`) until both are filled.
    fn ensure_not_empty(&self, cgroup_path: &Path, interface_file: &str) -> Result<()> {
        let mut current = self.hierarchy.mount_point(self.name());
        for component in cgroup_path.components() {
            let parent_file = current.join(interface_file);
            let parent_value = read_value(&parent_file)?;
            if parent_value.is_empty() {
                return Err(KapselError::config(format!(
                    "{} is empty, cannot inherit it",
                    parent_file.display()
                )));
            }

            current.push(component);
            let child_file = current.join(interface_file);
            if read_value(&child_file)?.is_empty() {
                write_cgroup_file(&child_file, &parent_value)?;
            }
        }
        Ok(())
    }
}

/// Reads a control file, treating a missing file as empty.
fn read_value(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(v) => Ok(v.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(KapselError::io(path, e)),
    }
}

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn set(&self, cgroup_path: &Path, resources: &ResourceConfig) -> Result<()> {
        let Some(cpus) = resources.cpuset.as_deref() else {
            return Ok(());
        };
        let dir = self.hierarchy.cgroup_path(self.name(), cgroup_path, true)?;
        self.ensure_not_empty(cgroup_path, CGROUP_CPUSET_MEMS)?;
        self.ensure_not_empty(cgroup_path, CGROUP_CPUSET_CPUS)?;
        write_cgroup_file(&dir.join(CGROUP_CPUSET_CPUS), cpus)?;
        tracing::debug!(cpus, "cpuset set");
        Ok(())
    }

    fn apply(&self, cgroup_path: &Path, pid: u32, resources: &ResourceConfig) -> Result<()> {
        if resources.cpuset.is_none() {
            return Ok(());
        }
        apply_to(&self.hierarchy, self.name(), cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &Path) -> Result<()> {
        remove_from(&self.hierarchy, self.name(), cgroup_path)
    }
}
