//! Running the `ip` and `iptables` tools.

use std::process::Command;
use std::sync::Mutex;

use kapsel_common::error::{KapselError, Result};

/// Runs external network tools.
///
/// A command runs in the network namespace of the calling thread, which is
/// what lets endpoint configuration target a container's namespace.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`KapselError::Command`] if the program cannot be spawned or
    /// exits unsuccessfully.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// Renders a command line for logs and errors.
#[must_use]
pub fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns true when a failed command only reported a missing device.
#[must_use]
pub fn is_missing_device(err: &KapselError) -> bool {
    matches!(err, KapselError::Command { message, .. }
        if message.contains("Cannot find device") || message.contains("does not exist"))
}

/// Returns true when `iptables -D` failed only because the rule is absent.
#[must_use]
pub fn is_missing_rule(err: &KapselError) -> bool {
    matches!(err, KapselError::Command { message, .. }
        if message.contains("Bad rule") || message.contains("does a matching rule exist"))
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command = render(program, args);
        tracing::debug!(command = %command, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| KapselError::Command {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(KapselError::Command {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// [`CommandRunner`] that records command lines and succeeds with empty
/// output unless told to fail.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    failures: Vec<(String, String)>,
}

impl RecordingRunner {
    /// A recorder where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command line starting with `prefix` fail with `stderr`.
    #[must_use]
    pub fn failing_on(mut self, prefix: &str, stderr: &str) -> Self {
        self.failures.push((prefix.to_string(), stderr.to_string()));
        self
    }

    /// Command lines observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command = render(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }
        if let Some((_, stderr)) = self.failures.iter().find(|(p, _)| command.starts_with(p)) {
            return Err(KapselError::Command {
                command,
                message: stderr.clone(),
            });
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_runner_reports_failure_with_stderr() {
        let err = SystemRunner
            .run("sh", &["-c", "echo boom >&2; exit 3"])
            .unwrap_err();
        assert!(matches!(
            &err,
            KapselError::Command { command, message }
                if command == "sh -c echo boom >&2; exit 3" && message == "boom"
        ));
    }

    #[test]
    fn system_runner_returns_stdout() {
        assert_eq!(SystemRunner.run("echo", &["hi"]).unwrap(), "hi\n");
    }

    #[test]
    fn recorder_fails_on_prefix() {
        let runner = RecordingRunner::new().failing_on("ip link del", "Cannot find device \"x\"");
        assert!(runner.run("ip", &["link", "add", "x"]).is_ok());
        let err = runner.run("ip", &["link", "del", "x"]).unwrap_err();
        assert!(is_missing_device(&err));
        assert_eq!(runner.calls(), vec!["ip link add x", "ip link del x"]);
    }

    #[test]
    fn missing_rule_is_told_apart_from_other_failures() {
        let runner = RecordingRunner::new()
            .failing_on(
                "iptables -D",
                "iptables: Bad rule (does a matching rule exist in that chain?).",
            )
            .failing_on("iptables -A", "iptables: No chain/target/match by that name.");
        let missing = runner.run("iptables", &["-D", "POSTROUTING"]).unwrap_err();
        let other = runner.run("iptables", &["-A", "POSTROUTING"]).unwrap_err();
        assert!(is_missing_rule(&missing));
        assert!(!is_missing_rule(&other));
        assert!(!is_missing_device(&missing));
    }
}
