//! `kapsel exec`: Run a command inside a running container.

use clap::Args;
use kapsel_runtime::engine::Engine;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID or name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command.
///
/// Stdio is shared with the command; the process exits with its status.
///
/// # Errors
///
/// Returns an error if the container is not running or the helper cannot
/// be started.
pub fn execute(args: &ExecArgs, engine: &Engine) -> anyhow::Result<()> {
    let code = engine.exec(&args.container, &args.command)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
