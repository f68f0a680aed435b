//! Running commands inside an existing container.
//!
//! `exec` re-executes the binary with two sentinel variables set. The new
//! process notices them in [`namespace_hook`] before anything else runs,
//! joins the target's namespaces while it is still single threaded, and
//! runs the command through `/bin/sh -c`.

use std::process::{Command, ExitStatus};

use kapsel_common::constants::{EXEC_CMD_ENV, EXEC_PID_ENV};
use kapsel_common::error::{KapselError, Result};

use crate::process::SELF_EXE;

const SHELL: &str = "/bin/sh";

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

/// Checks for the exec sentinels and, if both are present, joins the target
/// namespaces and runs the command.
///
/// Returns `None` when this is a normal invocation. Must run first thing in
/// `main`: `setns` into a mount namespace fails once threads exist.
#[must_use]
pub fn namespace_hook() -> Option<Result<i32>> {
    let pid = std::env::var(EXEC_PID_ENV).ok()?;
    let command = std::env::var(EXEC_CMD_ENV).ok()?;
    Some(enter_and_run(&pid, &command))
}

fn enter_and_run(pid: &str, command: &str) -> Result<i32> {
    let pid: i32 = pid
        .parse()
        .map_err(|e| KapselError::config(format!("invalid {EXEC_PID_ENV} `{pid}`: {e}")))?;
    kapsel_core::namespace::join::join_namespaces(pid)?;

    let status = Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .env_remove(EXEC_PID_ENV)
        .env_remove(EXEC_CMD_ENV)
        .status()
        .map_err(|e| KapselError::Command {
            command: format!("{SHELL} -c {command}"),
            message: e.to_string(),
        })?;
    Ok(exit_code(status))
}

/// Parses the NUL separated `KEY=VALUE` list of `/proc/<pid>/environ`.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Runs `command` inside the container whose init is `pid`, with that
/// process's environment, and returns the command's exit code.
///
/// Stdio is inherited so interactive commands work.
///
/// # Errors
///
/// Returns an error if the command is empty, the target environment cannot
/// be read, or the helper process cannot be started.
pub fn exec_in_container(pid: i32, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(KapselError::config("exec command is empty"));
    }
    let environ_path = format!("/proc/{pid}/environ");
    let raw = std::fs::read(&environ_path).map_err(|e| KapselError::io(&environ_path, e))?;
    let command = command.join(" ");
    tracing::info!(pid, command = %command, "exec into container");

    let status = Command::new(SELF_EXE)
        .arg("exec")
        .envs(parse_environ(&raw))
        .env(EXEC_PID_ENV, pid.to_string())
        .env(EXEC_CMD_ENV, &command)
        .status()
        .map_err(|e| KapselError::Command {
            command: format!("{SELF_EXE} exec"),
            message: e.to_string(),
        })?;
    Ok(exit_code(status))
}
