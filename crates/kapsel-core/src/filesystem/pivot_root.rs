//! Switching the container's root filesystem via `pivot_root(2)`.
//!
//! More secure than `chroot` because the old root is actually detached
//! rather than just hidden from the process's view of `/`.

use std::path::Path;

use kapsel_common::error::{KapselError, Result};

/// Directory created inside the new root to receive the old one.
pub const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the root of the calling mount namespace.
///
/// Steps, each of which aborts on failure:
/// 1. bind-mount `new_root` onto itself so it is a mount point
/// 2. create `new_root/.pivot_root`
/// 3. `pivot_root(new_root, new_root/.pivot_root)`
/// 4. `chdir("/")`
/// 5. lazily unmount `/.pivot_root` and remove the directory
///
/// The caller must already be in a private mount namespace.
///
/// # Errors
///
/// Returns an error if any step fails.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, MsFlags, mount, umount2};

    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| KapselError::syscall("mount", format!("bind new root onto itself: {e}")))?;

    let put_old = new_root.join(PUT_OLD);
    std::fs::create_dir_all(&put_old).map_err(|e| KapselError::io(&put_old, e))?;

    nix::unistd::pivot_root(new_root, &put_old)
        .map_err(|e| KapselError::syscall("pivot_root", e))?;
    nix::unistd::chdir("/").map_err(|e| KapselError::syscall("chdir", e))?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH)
        .map_err(|e| KapselError::syscall("umount", format!("old root: {e}")))?;
    std::fs::remove_dir(&old_root).map_err(|e| KapselError::io(&old_root, e))?;

    tracing::info!(new_root = %new_root.display(), "root filesystem switched");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; `pivot_root` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(KapselError::config(
        "Linux required for native container operations",
    ))
}
