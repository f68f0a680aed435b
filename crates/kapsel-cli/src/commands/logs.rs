//! `kapsel logs`: Print a container's output.

use clap::Args;
use kapsel_runtime::engine::Engine;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or its log is unreadable.
pub fn execute(args: &LogsArgs, engine: &Engine) -> anyhow::Result<()> {
    let logs = engine.logs(&args.container)?;
    print!("{logs}");
    Ok(())
}
