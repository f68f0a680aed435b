//! Filesystem management for container isolation.
//!
//! Provides the per-container overlay workspace, volume bind mounts,
//! `pivot_root` for switching into the new root, and the pseudo-filesystem
//! mounts performed by the container's init process.

pub mod mount;
pub mod mounter;
pub mod overlayfs;
pub mod pivot_root;
pub mod volume;
