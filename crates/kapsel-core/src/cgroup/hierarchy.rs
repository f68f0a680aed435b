//! Locating cgroup v1 hierarchies.
//!
//! Each v1 subsystem is mounted on its own hierarchy (for example
//! `/sys/fs/cgroup/memory`). The mount point is discovered from
//! `/proc/self/mountinfo`, whose lines look like:
//!
//! ```text
//! 104 85 0:20 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime - cgroup cgroup rw,memory
//! ```

use std::path::{Path, PathBuf};

use kapsel_common::error::{KapselError, Result};

/// Field index of the mount point in a mountinfo line.
const MOUNT_POINT_INDEX: usize = 4;

const PROC_SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Where subsystem hierarchies live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hierarchy {
    /// Discover mount points by scanning a mountinfo file.
    MountInfo(PathBuf),
    /// Every subsystem is a directory named after it under a fixed root.
    Fixed(PathBuf),
}

impl Hierarchy {
    /// The host hierarchy as seen through `/proc/self/mountinfo`.
    #[must_use]
    pub fn system() -> Self {
        Self::MountInfo(PathBuf::from(PROC_SELF_MOUNTINFO))
    }

    /// A fixed root, used for tests and unusual layouts.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self::Fixed(root.into())
    }

    /// Returns the mount point of `subsystem`, or an empty path when it is
    /// not mounted.
    #[must_use]
    pub fn mount_point(&self, subsystem: &str) -> PathBuf {
        match self {
            Self::Fixed(root) => root.join(subsystem),
            Self::MountInfo(file) => match std::fs::read_to_string(file) {
                Ok(content) => find_mount_point(&content, subsystem).unwrap_or_default(),
                Err(e) => {
                    tracing::error!(path = %file.display(), error = %e, "failed to read mountinfo");
                    PathBuf::new()
                }
            },
        }
    }

    /// Resolves the absolute directory of `cgroup_path` in `subsystem`'s
    /// hierarchy, creating it when `create` is set and it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the subsystem is not mounted or the directory
    /// cannot be created.
    pub fn cgroup_path(
        &self,
        subsystem: &str,
        cgroup_path: &Path,
        create: bool,
    ) -> Result<PathBuf> {
        let root = self.mount_point(subsystem);
        if root.as_os_str().is_empty() {
            return Err(KapselError::NotFound {
                kind: "cgroup hierarchy",
                id: subsystem.to_string(),
            });
        }
        let abs = root.join(cgroup_path);
        if create && !abs.exists() {
            std::fs::create_dir_all(&abs).map_err(|e| KapselError::io(&abs, e))?;
            tracing::debug!(subsystem, path = %abs.display(), "cgroup directory created");
        }
        Ok(abs)
    }
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::system()
    }
}

/// Scans mountinfo content for a hierarchy whose super options contain
/// exactly `subsystem`.
#[must_use]
pub fn find_mount_point(mountinfo: &str, subsystem: &str) -> Option<PathBuf> {
    mountinfo.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(' ').collect();
        let options = fields.last()?;
        options
            .split(',')
            .any(|opt| opt == subsystem)
            .then(|| fields.get(MOUNT_POINT_INDEX).map(PathBuf::from))
            .flatten()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
25 0 253:1 / / rw,relatime shared:1 - ext4 /dev/vda1 rw
35 25 0:29 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
37 35 0:31 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:11 - cgroup cgroup rw,cpu,cpuacct
38 35 0:32 / /sys/fs/cgroup/cpuset rw,nosuid,nodev,noexec,relatime shared:12 - cgroup cgroup rw,cpuset
39 35 0:33 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:13 - cgroup cgroup rw,memory";

    #[test]
    fn finds_exact_option_match() {
        assert_eq!(
            find_mount_point(SAMPLE, "memory"),
            Some(PathBuf::from("/sys/fs/cgroup/memory"))
        );
        assert_eq!(
            find_mount_point(SAMPLE, "cpu"),
            Some(PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"))
        );
    }

    #[test]
    fn cpu_does_not_match_cpuset() {
        let only_cpuset = SAMPLE
            .lines()
            .filter(|l| !l.contains("cpuacct"))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(find_mount_point(&only_cpuset, "cpu"), None);
        assert_eq!(
            find_mount_point(&only_cpuset, "cpuset"),
            Some(PathBuf::from("/sys/fs/cgroup/cpuset"))
        );
    }

    #[test]
    fn missing_subsystem_yields_empty_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mountinfo");
        std::fs::write(&file, SAMPLE).unwrap();
        let hierarchy = Hierarchy::MountInfo(file);
        assert!(hierarchy.mount_point("pids").as_os_str().is_empty());
        assert!(hierarchy.cgroup_path("pids", Path::new("kapsel/x"), true).is_err());
    }

    #[test]
    fn fixed_hierarchy_creates_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let hierarchy = Hierarchy::at(dir.path());
        let path = hierarchy
            .cgroup_path("memory", Path::new("kapsel/abc"), true)
            .unwrap();
        assert_eq!(path, dir.path().join("memory/kapsel/abc"));
        assert!(path.is_dir());
    }
}
