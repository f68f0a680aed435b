//! Linux namespace management for container isolation.
//!
//! New containers get their namespaces in one `clone(2)` call; `exec`
//! joins an existing container's namespaces with `setns(2)`.

pub mod join;

/// The namespaces a container is isolated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Network stack.
    Net,
    /// Process IDs.
    Pid,
    /// Mount table.
    Mnt,
}

impl NamespaceKind {
    /// Join order used by `exec`. The mount namespace comes last so that
    /// `/proc/<pid>/ns/*` stays reachable while the others are joined.
    pub const JOIN_ORDER: [Self; 5] = [Self::Ipc, Self::Uts, Self::Net, Self::Pid, Self::Mnt];

    /// File name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Mnt => "mnt",
        }
    }

    /// The matching `CLONE_NEW*` flag.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub const fn clone_flag(self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;
        match self {
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mnt => CloneFlags::CLONE_NEWNS,
        }
    }
}

/// Flags passed to `clone(2)` when starting a container's init process.
#[cfg(target_os = "linux")]
#[must_use]
pub fn container_clone_flags() -> nix::sched::CloneFlags {
    NamespaceKind::JOIN_ORDER
        .iter()
        .fold(nix::sched::CloneFlags::empty(), |acc, ns| acc | ns.clone_flag())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use nix::sched::CloneFlags;

    use super::*;

    #[test]
    fn clone_flags_cover_five_namespaces() {
        let flags = container_clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET));
        assert!(flags.contains(CloneFlags::CLONE_NEWIPC));
        assert!(!flags.contains(CloneFlags::CLONE_NEWUSER));
    }

    #[test]
    fn mount_namespace_is_joined_last() {
        assert_eq!(NamespaceKind::JOIN_ORDER.last(), Some(&NamespaceKind::Mnt));
        assert_eq!(NamespaceKind::Net.proc_name(), "net");
    }
}
