//! Memory limits through the v1 `memory` controller.

use std::path::Path;

use kapsel_common::error::Result;
use kapsel_common::types::ResourceConfig;

use super::{Hierarchy, Subsystem, apply_to, remove_from, write_cgroup_file};

const CGROUP_MEMORY_LIMIT: &str = "memory.limit_in_bytes";

/// Driver for the `memory` hierarchy.
#[derive(Debug, Clone)]
pub struct MemorySubsystem {
    hierarchy: Hierarchy,
}

impl MemorySubsystem {
    /// Creates the driver over `hierarchy`.
    #[must_use]
    pub const fn new(hierarchy: Hierarchy) -> Self {
        Self { hierarchy }
    }
}

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, cgroup_path: &Path, resources: &ResourceConfig) -> Result<()> {
        let Some(limit) = resources.memory_limit.as_deref() else {
            return Ok(());
        };
        let dir = self.hierarchy.cgroup_path(self.name(), cgroup_path, true)?;
        // The kernel parses suffixes such as `100m` itself.
        write_cgroup_file(&dir.join(CGROUP_MEMORY_LIMIT), limit)?;
        tracing::debug!(limit, "memory limit set");
        Ok(())
    }

    fn apply(&self, cgroup_path: &Path, pid: u32, resources: &ResourceConfig) -> Result<()> {
        if resources.memory_limit.is_none() {
            return Ok(());
        }
        apply_to(&self.hierarchy, self.name(), cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &Path) -> Result<()> {
        remove_from(&self.hierarchy, self.name(), cgroup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_limit_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemorySubsystem::new(Hierarchy::at(dir.path()));
        let res = ResourceConfig::from_raw("100m", 0, "");
        memory.set(Path::new("kapsel/m"), &res).unwrap();
        memory.apply(Path::new("kapsel/m"), 77, &res).unwrap();

        let group = dir.path().join("memory/kapsel/m");
        assert_eq!(
            std::fs::read_to_string(group.join(CGROUP_MEMORY_LIMIT)).unwrap(),
            "100m"
        );
        assert_eq!(std::fs::read_to_string(group.join("tasks")).unwrap(), "77");
    }

    #[test]
    fn apply_before_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemorySubsystem::new(Hierarchy::at(dir.path()));
        let res = ResourceConfig::from_raw("1g", 0, "");
        assert!(memory.apply(Path::new("kapsel/m"), 1, &res).is_err());
    }
}
