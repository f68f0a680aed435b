//! Launching the namespaced init process.
//!
//! The runtime re-executes its own binary as `init` inside fresh UTS, PID,
//! mount, network and IPC namespaces. The user command is not passed on the
//! command line: it travels over a pipe whose read end sits at descriptor 3
//! in the child, so the parent can finish cgroup and network setup before
//! the command starts.

use std::path::PathBuf;

use kapsel_common::error::{KapselError, Result};

/// Path used to re-execute the running binary.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Hidden subcommand the child runs.
pub const INIT_COMMAND: &str = "init";

/// Everything the launcher needs to start one container's init process.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Working directory of the child, the merged overlay root.
    pub workdir: PathBuf,
    /// Where stdout and stderr go for detached containers. `None` inherits
    /// the caller's stdio.
    pub log_file: Option<PathBuf>,
    /// Extra `KEY=VALUE` entries added to the inherited environment.
    pub env: Vec<String>,
}

/// A started init process still waiting for its command.
pub trait InitProcess: Send {
    /// Host pid of the init process.
    fn pid(&self) -> i32;

    /// Hands the command line to the child and closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe was already closed or the write fails.
    fn send_command(&mut self, command: &[String]) -> Result<()>;

    /// Blocks until the child exits and returns its exit code. A child
    /// killed by a signal reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    fn wait(&mut self) -> Result<i32>;

    /// Kills and reaps the child. Failures are logged.
    fn kill(&mut self);
}

/// Starts init processes.
pub trait Launcher: Send + Sync {
    /// Starts a child for `spec`. The child blocks until it receives its
    /// command.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe, the log file, or the process cannot be
    /// created.
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn InitProcess>>;
}

/// Checks that every entry looks like `KEY=VALUE` with a non-empty key.
///
/// # Errors
///
/// Returns [`KapselError::Config`] naming the first bad entry.
pub fn validate_env(env: &[String]) -> Result<()> {
    for entry in env {
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => {
                return Err(KapselError::config(format!(
                    "environment entry `{entry}` must be KEY=VALUE"
                )));
            }
        }
    }
    Ok(())
}

/// Returns true if a process with `pid` exists.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

/// Sends SIGTERM to `pid`. A process that is already gone is not an error.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered for another reason.
pub fn terminate(pid: i32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            tracing::warn!(pid, "process already gone");
            Ok(())
        }
        Err(e) => Err(KapselError::syscall("kill", e)),
    }
}

/// Launches init through `clone(2)` with the container namespace set.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamespaceLauncher;

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CString;
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::{AsRawFd, RawFd};
    use std::os::unix::ffi::OsStrExt;

    use kapsel_common::constants::INIT_PIPE_FD;
    use kapsel_common::error::{KapselError, Result};
    use kapsel_core::namespace::container_clone_flags;
    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::Pid;

    use super::{INIT_COMMAND, InitProcess, LaunchSpec, Launcher, NamespaceLauncher, SELF_EXE};

    const STACK_SIZE: usize = 1024 * 1024;

    /// Exit code of a child that could not set itself up before exec.
    const SETUP_FAILED: isize = 126;

    /// Exit code of a child whose exec failed.
    const EXEC_FAILED: isize = 127;

    fn cstring(bytes: &[u8]) -> Result<CString> {
        CString::new(bytes).map_err(|e| KapselError::config(format!("value contains NUL: {e}")))
    }

    /// Inherited environment followed by the extra entries.
    fn child_environment(extra: &[String]) -> Result<Vec<CString>> {
        let mut env = Vec::new();
        for (key, value) in std::env::vars_os() {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            env.push(cstring(&entry)?);
        }
        for entry in extra {
            env.push(cstring(entry.as_bytes())?);
        }
        Ok(env)
    }

    fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
        strings
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect()
    }

    /// Runs in the cloned child. Only async-signal-safe calls are made.
    ///
    /// # Safety
    ///
    /// Every pointer must stay valid for the duration of the call and the
    /// vectors must be null terminated.
    unsafe fn child_main(
        pipe_fd: RawFd,
        log_fd: Option<RawFd>,
        workdir: &CString,
        exe: &CString,
        argv: &[*const libc::c_char],
        envp: &[*const libc::c_char],
    ) -> isize {
        // SAFETY: plain descriptor and path syscalls on values owned by the
        // parent's stack frame, which the cloned child has its own copy of.
        unsafe {
            if let Some(fd) = log_fd {
                if libc::dup2(fd, libc::STDOUT_FILENO) < 0
                    || libc::dup2(fd, libc::STDERR_FILENO) < 0
                {
                    return SETUP_FAILED;
                }
            }
            if pipe_fd == INIT_PIPE_FD {
                if libc::fcntl(pipe_fd, libc::F_SETFD, 0) < 0 {
                    return SETUP_FAILED;
                }
            } else if libc::dup2(pipe_fd, INIT_PIPE_FD) < 0 {
                return SETUP_FAILED;
            }
            if libc::chdir(workdir.as_ptr()) < 0 {
                return SETUP_FAILED;
            }
            let _ = libc::execve(exe.as_ptr(), argv.as_ptr(), envp.as_ptr());
        }
        EXEC_FAILED
    }

    impl Launcher for NamespaceLauncher {
        fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn InitProcess>> {
            let (read_end, write_end) =
                nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| KapselError::syscall("pipe2", e))?;
            let log = spec
                .log_file
                .as_deref()
                .map(crate::logs::create_log_file)
                .transpose()?;

            let exe = cstring(SELF_EXE.as_bytes())?;
            let argv = [exe.clone(), cstring(INIT_COMMAND.as_bytes())?];
            let env = child_environment(&spec.env)?;
            let workdir = cstring(spec.workdir.as_os_str().as_bytes())?;
            let argv_ptrs = null_terminated(&argv);
            let env_ptrs = null_terminated(&env);

            let pipe_fd = read_end.as_raw_fd();
            let log_fd = log.as_ref().map(AsRawFd::as_raw_fd);
            let mut stack = vec![0_u8; STACK_SIZE];

            let child = Box::new(|| {
                // SAFETY: the CStrings and pointer vectors live in this
                // frame and are null terminated.
                unsafe { child_main(pipe_fd, log_fd, &workdir, &exe, &argv_ptrs, &env_ptrs) }
            });
            // SAFETY: no CLONE_VM, so the child runs on a private copy of
            // the address space and only calls async-signal-safe functions
            // before execve.
            let pid = unsafe {
                nix::sched::clone(
                    child,
                    &mut stack,
                    container_clone_flags(),
                    Some(Signal::SIGCHLD as libc::c_int),
                )
            }
            .map_err(|e| KapselError::syscall("clone", e))?;
            drop(read_end);

            tracing::info!(pid = pid.as_raw(), workdir = %spec.workdir.display(), "init process cloned");
            Ok(Box::new(ParentProcess {
                pid,
                pipe: Some(File::from(write_end)),
            }))
        }
    }

    /// Parent-side handle on a cloned init process.
    #[derive(Debug)]
    struct ParentProcess {
        pid: Pid,
        pipe: Option<File>,
    }

    impl InitProcess for ParentProcess {
        fn pid(&self) -> i32 {
            self.pid.as_raw()
        }

        fn send_command(&mut self, command: &[String]) -> Result<()> {
            let mut pipe = self
                .pipe
                .take()
                .ok_or_else(|| KapselError::config("command already sent"))?;
            pipe.write_all(command.join(" ").as_bytes())
                .map_err(|e| KapselError::syscall("write", e))?;
            tracing::debug!(pid = self.pid.as_raw(), "command handed to init");
            Ok(())
        }

        fn wait(&mut self) -> Result<i32> {
            loop {
                match waitpid(self.pid, None) {
                    Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                    Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                    Ok(_) | Err(Errno::EINTR) => {}
                    Err(e) => return Err(KapselError::syscall("waitpid", e)),
                }
            }
        }

        fn kill(&mut self) {
            self.pipe = None;
            if let Err(e) = kill(self.pid, Signal::SIGKILL) {
                tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to kill init process");
                return;
            }
            if let Err(e) = waitpid(self.pid, None) {
                tracing::warn!(pid = self.pid.as_raw(), error = %e, "failed to reap init process");
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Launcher for NamespaceLauncher {
    fn spawn(&self, _spec: &LaunchSpec) -> Result<Box<dyn InitProcess>> {
        Err(KapselError::config(
            "Linux required for native container operations",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_entries_need_a_key() {
        assert!(validate_env(&["A=1".into(), "B=".into(), "C=x=y".into()]).is_ok());
        assert!(validate_env(&["NOEQUALS".into()]).is_err());
        assert!(validate_env(&["=value".into()]).is_err());
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(i32::try_from(std::process::id()).unwrap()));
    }

    #[test]
    fn reaped_process_is_gone() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = i32::try_from(child.id()).unwrap();
        child.wait().unwrap();
        assert!(!is_alive(pid));
        assert!(terminate(pid).is_ok());
    }
}
