//! `kapsel rm`: Remove a container.

use clap::Args;
use kapsel_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container ID or name.
    pub container: String,

    /// Remove a running or exited container; a running one is stopped first.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is running or exited without
/// `--force`, or its resources cannot be removed.
pub fn execute(args: &RmArgs, engine: &Engine) -> anyhow::Result<()> {
    engine.remove(&args.container, args.force)?;
    println!("{}", args.container);
    Ok(())
}
