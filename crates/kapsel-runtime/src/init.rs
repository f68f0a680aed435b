//! The container side of the launch: runs as pid 1 inside the new
//! namespaces, with the merged overlay as its working directory.

use std::io::Read;

use kapsel_common::error::{KapselError, Result};

/// Splits a command line received over the init pipe.
///
/// # Errors
///
/// Returns an error if the line holds no words.
pub fn parse_command(line: &str) -> Result<Vec<String>> {
    let words: Vec<String> = line
        .split(' ')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        return Err(KapselError::config("received an empty command"));
    }
    Ok(words)
}

/// Reads the full command line from `pipe` until EOF.
///
/// # Errors
///
/// Returns an error if reading fails or the command is empty.
pub fn read_command(mut pipe: impl Read) -> Result<Vec<String>> {
    let mut line = String::new();
    let _ = pipe
        .read_to_string(&mut line)
        .map_err(|e| KapselError::syscall("read init pipe", e))?;
    parse_command(line.trim_end_matches('\n'))
}

/// Entry point of the hidden `init` subcommand.
///
/// Reads the command, switches the root to the working directory, mounts
/// `/proc` and `/dev`, and replaces itself with the command. Only returns
/// on failure.
///
/// # Errors
///
/// Returns an error if any setup step fails or the command cannot be found
/// or executed.
#[cfg(target_os = "linux")]
pub fn run_container_init() -> Result<()> {
    use std::ffi::CString;
    use std::os::fd::{FromRawFd, OwnedFd};
    use std::os::unix::ffi::OsStrExt;

    use kapsel_common::constants::INIT_PIPE_FD;
    use kapsel_core::filesystem::{mount, pivot_root};

    // SAFETY: the launcher places the read end of the command pipe at this
    // descriptor and nothing else in this process owns it.
    let pipe = unsafe { OwnedFd::from_raw_fd(INIT_PIPE_FD) };
    let command = read_command(std::fs::File::from(pipe))?;
    tracing::info!(command = ?command, "container init starting");

    mount::make_private()?;
    let root = std::env::current_dir().map_err(|e| KapselError::io(".", e))?;
    pivot_root::pivot_root(&root)?;
    mount::mount_pseudo_filesystems()?;

    let program = which::which(&command[0]).map_err(|e| KapselError::NotFound {
        kind: "command",
        id: format!("{}: {e}", command[0]),
    })?;
    tracing::debug!(program = %program.display(), "exec user command");

    let to_cstring = |bytes: &[u8]| {
        CString::new(bytes).map_err(|e| KapselError::config(format!("argument contains NUL: {e}")))
    };
    let path = to_cstring(program.as_os_str().as_bytes())?;
    let args = command
        .iter()
        .map(|a| to_cstring(a.as_bytes()))
        .collect::<Result<Vec<_>>>()?;

    let Err(e) = nix::unistd::execv(&path, &args);
    Err(KapselError::syscall("execv", e))
}

/// Entry point of the hidden `init` subcommand.
///
/// # Errors
///
/// Always returns an error on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn run_container_init() -> Result<()> {
    Err(KapselError::config(
        "Linux required for native container operations",
    ))
}
