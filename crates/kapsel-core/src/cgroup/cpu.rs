//! CPU bandwidth and share control through the v1 `cpu` controller.

use std::path::Path;

use kapsel_common::error::Result;
use kapsel_common::types::ResourceConfig;

use super::{Hierarchy, Subsystem, apply_to, remove_from, write_cgroup_file};

const CGROUP_CPU_SHARES: &str = "cpu.shares";
const CGROUP_CPU_PERIOD: &str = "cpu.cfs_period_us";
const CGROUP_CPU_QUOTA: &str = "cpu.cfs_quota_us";

/// CFS scheduling period written alongside every quota.
pub const DEFAULT_CFS_PERIOD_US: u64 = 100_000;

/// Converts a percentage of one CPU into a CFS quota for
/// [`DEFAULT_CFS_PERIOD_US`].
#[must_use]
pub const fn quota_for_percent(percent: u32) -> u64 {
    DEFAULT_CFS_PERIOD_US / 100 * percent as u64
}

/// Driver for the `cpu` hierarchy.
#[derive(Debug, Clone)]
pub struct CpuSubsystem {
    hierarchy: Hierarchy,
}

impl CpuSubsystem {
    /// Creates the driver over `hierarchy`.
    #[must_use]
    pub const fn new(hierarchy: Hierarchy) -> Self {
        Self { hierarchy }
    }

    const fn needs_to_handle(resources: &ResourceConfig) -> bool {
        resources.cpu_shares.is_some() || resources.cpu_quota_percent.is_some()
    }
}

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(&self, cgroup_path: &Path, resources: &ResourceConfig) -> Result<()> {
        if !Self::needs_to_handle(resources) {
            return Ok(());
        }
        let dir = self.hierarchy.cgroup_path(self.name(), cgroup_path, true)?;

        if let Some(shares) = resources.cpu_shares {
            write_cgroup_file(&dir.join(CGROUP_CPU_SHARES), &shares.to_string())?;
        }
        if let Some(percent) = resources.cpu_quota_percent {
            write_cgroup_file(
                &dir.join(CGROUP_CPU_PERIOD),
                &DEFAULT_CFS_PERIOD_US.to_string(),
            )?;
            let quota = quota_for_percent(percent);
            write_cgroup_file(&dir.join(CGROUP_CPU_QUOTA), &quota.to_string())?;
            tracing::debug!(quota, period = DEFAULT_CFS_PERIOD_US, "cpu quota set");
        }
        Ok(())
    }

    fn apply(&self, cgroup_path: &Path, pid: u32, resources: &ResourceConfig) -> Result<()> {
        if !Self::needs_to_handle(resources) {
            return Ok(());
        }
        apply_to(&self.hierarchy, self.name(), cgroup_path, pid)
    }

    fn remove(&self, cgroup_path: &Path) -> Result<()> {
        remove_from(&self.hierarchy, self.name(), cgroup_path)
    }
}
