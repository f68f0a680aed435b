//! The seam between workspace bookkeeping and `mount(2)`.
//!
//! The workspace manager issues every host-side mount through a
//! [`Mounter`], so the order of mounts and unmounts can be checked without
//! privileges by swapping in a [`RecordingMounter`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use kapsel_common::error::{KapselError, Result};

/// Host-side mount operations needed by a container workspace.
pub trait Mounter: Send + Sync {
    /// Mounts a union filesystem of type `fstype` at `target` with the
    /// given `lowerdir=…,upperdir=…,workdir=…` options.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_union(&self, fstype: &str, options: &str, target: &Path) -> Result<()>;

    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    /// Detaches whatever is mounted at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is mounted there or the unmount fails.
    fn unmount(&self, target: &Path) -> Result<()>;
}

/// [`Mounter`] backed by the real system calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMounter;

#[cfg(target_os = "linux")]
impl Mounter for SystemMounter {
    fn mount_union(&self, fstype: &str, options: &str, target: &Path) -> Result<()> {
        use nix::mount::{MsFlags, mount};

        mount(
            Some(fstype),
            target,
            Some(fstype),
            MsFlags::empty(),
            Some(options),
        )
        .map_err(|e| {
            KapselError::syscall("mount", format!("{fstype} at {}: {e}", target.display()))
        })?;
        tracing::info!(target = %target.display(), fstype, "union filesystem mounted");
        Ok(())
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        use nix::mount::{MsFlags, mount};

        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| {
            KapselError::syscall(
                "mount",
                format!("bind {} to {}: {e}", source.display(), target.display()),
            )
        })?;
        tracing::info!(source = %source.display(), target = %target.display(), "bind mount created");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH)
            .map_err(|e| KapselError::syscall("umount", format!("{}: {e}", target.display())))?;
        tracing::debug!(target = %target.display(), "unmounted");
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for SystemMounter {
    fn mount_union(&self, _fstype: &str, _options: &str, _target: &Path) -> Result<()> {
        Err(KapselError::config("Linux required for native container operations"))
    }

    fn bind(&self, _source: &Path, _target: &Path) -> Result<()> {
        Err(KapselError::config("Linux required for native container operations"))
    }

    fn unmount(&self, _target: &Path) -> Result<()> {
        Err(KapselError::config("Linux required for native container operations"))
    }
}

/// One call observed by a [`RecordingMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    /// [`Mounter::mount_union`].
    Union {
        /// Filesystem type.
        fstype: String,
        /// Mount options.
        options: String,
        /// Mount point.
        target: PathBuf,
    },
    /// [`Mounter::bind`].
    Bind {
        /// Bind source.
        source: PathBuf,
        /// Mount point.
        target: PathBuf,
    },
    /// [`Mounter::unmount`].
    Unmount {
        /// Mount point.
        target: PathBuf,
    },
}

/// [`Mounter`] that records calls instead of touching the kernel.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    calls: Mutex<Vec<MountCall>>,
    fail_bind: bool,
}

impl RecordingMounter {
    /// A recorder whose every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose bind mounts fail.
    #[must_use]
    pub fn failing_bind() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_bind: true,
        }
    }

    /// Calls observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MountCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Mounter for RecordingMounter {
    fn mount_union(&self, fstype: &str, options: &str, target: &Path) -> Result<()> {
        self.record(MountCall::Union {
            fstype: fstype.to_string(),
            options: options.to_string(),
            target: target.to_path_buf(),
        });
        Ok(())
    }

    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        self.record(MountCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        });
        if self.fail_bind {
            return Err(KapselError::syscall("mount", "bind refused by recorder"));
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        Ok(())
    }
}
