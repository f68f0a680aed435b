//! `kapsel stop`: Stop a running container.

use clap::Args;
use kapsel_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ID or name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or not running.
pub fn execute(args: &StopArgs, engine: &Engine) -> anyhow::Result<()> {
    let record = engine.stop(&args.container)?;
    println!("{}", record.id);
    Ok(())
}
