//! Mounts performed by the container's init process inside its own
//! mount namespace.

use kapsel_common::error::{KapselError, Result};

/// Stops mount events from propagating back to the host by marking the
/// whole tree private.
///
/// # Errors
///
/// Returns an error if the remount fails.
#[cfg(target_os = "linux")]
pub fn make_private() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| KapselError::syscall("mount", format!("make / private: {e}")))?;
    tracing::debug!("mount tree made private");
    Ok(())
}

/// Mounts `/proc` and a fresh `/dev` in the current root.
///
/// # Errors
///
/// Returns an error if either mount fails.
#[cfg(target_os = "linux")]
pub fn mount_pseudo_filesystems() -> Result<()> {
    use nix::mount::{MsFlags, mount};

    for dir in ["/proc", "/dev"] {
        std::fs::create_dir_all(dir).map_err(|e| KapselError::io(dir, e))?;
    }

    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| KapselError::syscall("mount", format!("proc: {e}")))?;

    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| KapselError::syscall("mount", format!("tmpfs on /dev: {e}")))?;

    tracing::debug!("pseudo filesystems mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_private() -> Result<()> {
    Err(KapselError::config(
        "Linux required for native container operations",
    ))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_pseudo_filesystems() -> Result<()> {
    Err(KapselError::config(
        "Linux required for native container operations",
    ))
}
