//! Running work inside another process's network namespace.
//!
//! `setns(2)` changes the namespace of the calling thread only, so the work
//! runs on a dedicated scoped thread that enters the target namespace and
//! restores its original one when done.

use kapsel_common::error::{KapselError, Result};

/// Work executed inside a network namespace.
pub type NetnsWork<'a> = dyn Fn() -> Result<()> + Sync + 'a;

/// Executes work inside the network namespace of a process.
pub trait NetnsExec: Send + Sync {
    /// Runs `work` inside `pid`'s network namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be entered or `work` fails.
    fn within(&self, pid: i32, work: &NetnsWork<'_>) -> Result<()>;
}

/// Enters the target namespace for real on a scoped thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadNetns;

/// Runs work in the caller's own namespace. For tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineNetns;

impl NetnsExec for InlineNetns {
    fn within(&self, _pid: i32, work: &NetnsWork<'_>) -> Result<()> {
        work()
    }
}

/// Path of the network namespace handle of `pid`.
#[must_use]
pub fn netns_path(pid: i32) -> String {
    format!("/proc/{pid}/ns/net")
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::File;

    use nix::sched::{CloneFlags, setns};

    use super::{KapselError, NetnsExec, NetnsWork, Result, ThreadNetns, netns_path};

    /// Holds the thread's original network namespace and switches back to
    /// it on drop.
    #[derive(Debug)]
    pub struct NetnsGuard {
        original: File,
    }

    impl NetnsGuard {
        /// Records the current namespace, then enters `target`.
        ///
        /// # Errors
        ///
        /// Returns an error if either namespace handle is unusable.
        pub fn enter(target: &File) -> Result<Self> {
            let path = "/proc/thread-self/ns/net";
            let original = File::open(path).map_err(|e| KapselError::io(path, e))?;
            setns(target, CloneFlags::CLONE_NEWNET)
                .map_err(|e| KapselError::syscall("setns", e))?;
            Ok(Self { original })
        }
    }

    impl Drop for NetnsGuard {
        fn drop(&mut self) {
            if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
                tracing::error!(error = %e, "failed to restore network namespace");
            }
        }
    }

    impl NetnsExec for ThreadNetns {
        fn within(&self, pid: i32, work: &NetnsWork<'_>) -> Result<()> {
            let path = netns_path(pid);
            let target = File::open(&path).map_err(|e| KapselError::io(&path, e))?;

            std::thread::scope(|scope| {
                scope
                    .spawn(|| {
                        let _guard = NetnsGuard::enter(&target)?;
                        tracing::debug!(pid, "entered container network namespace");
                        work()
                    })
                    .join()
                    .map_err(|_| KapselError::syscall("setns", "namespace worker panicked"))?
            })
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::NetnsGuard;

#[cfg(not(target_os = "linux"))]
impl NetnsExec for ThreadNetns {
    fn within(&self, _pid: i32, _work: &NetnsWork<'_>) -> Result<()> {
        Err(KapselError::config("Linux required for native container operations"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn inline_runs_work_once() {
        let count = AtomicU32::new(0);
        InlineNetns
            .within(1, &|| {
                let _ = count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_process_fails_before_spawning() {
        let err = ThreadNetns.within(0, &|| Ok(())).unwrap_err();
        assert!(matches!(err, KapselError::Io { .. } | KapselError::Config { .. }));
    }
}
