//! Joining the namespaces of a running container.

use std::fs::File;
use std::path::PathBuf;

use kapsel_common::error::{KapselError, Result};

use super::NamespaceKind;

/// Path of a process's namespace handle.
#[must_use]
pub fn namespace_path(pid: i32, kind: NamespaceKind) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_name()))
}

/// Moves the calling thread into every namespace of `pid`.
///
/// Joining a mount namespace requires a single-threaded caller, so this
/// must run before any thread is spawned. A PID namespace join only
/// affects children created afterwards.
///
/// # Errors
///
/// Returns an error if a namespace file cannot be opened or `setns(2)`
/// fails.
#[cfg(target_os = "linux")]
pub fn join_namespaces(pid: i32) -> Result<()> {
    // Open every handle before the first join: once inside the target's
    // mount namespace, `/proc/<pid>` may no longer resolve.
    let handles = NamespaceKind::JOIN_ORDER
        .iter()
        .map(|&kind| {
            let path = namespace_path(pid, kind);
            File::open(&path)
                .map(|f| (kind, f))
                .map_err(|e| KapselError::io(path, e))
        })
        .collect::<Result<Vec<_>>>()?;

    for (kind, file) in &handles {
        nix::sched::setns(file, kind.clone_flag())
            .map_err(|e| KapselError::syscall("setns", format!("{}: {e}", kind.proc_name())))?;
        tracing::debug!(pid, namespace = kind.proc_name(), "joined namespace");
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn join_namespaces(_pid: i32) -> Result<()> {
    Err(KapselError::config(
        "Linux required for native container operations",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_paths_live_under_proc() {
        assert_eq!(
            namespace_path(42, NamespaceKind::Mnt),
            PathBuf::from("/proc/42/ns/mnt")
        );
    }

    #[test]
    fn joining_a_missing_pid_fails_before_any_setns() {
        // Pid 0 has no /proc entry.
        assert!(join_namespaces(0).is_err());
    }
}
