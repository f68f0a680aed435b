//! # kapsel-core
//!
//! Low-level Linux isolation primitives for the kapsel runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: the clone flag set for new containers and `setns(2)`
//!   joins for `exec`.
//! - **Cgroups v1**: cpu, cpuset, and memory subsystem drivers composed by a
//!   [`cgroup::CgroupManager`].
//! - **Filesystem**: overlay workspaces, volume bind mounts, `pivot_root`,
//!   and the pseudo-filesystems mounted inside a fresh root.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod namespace;
