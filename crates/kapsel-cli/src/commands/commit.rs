//! `kapsel commit`: Pack a container's root filesystem into an image.

use clap::Args;
use kapsel_runtime::engine::Engine;

/// Arguments for the `commit` command.
#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Container ID or name.
    pub container: String,

    /// Name of the image to write.
    pub image: String,
}

/// Executes the `commit` command.
///
/// # Errors
///
/// Returns an error if the container does not exist or the archive cannot
/// be written.
pub fn execute(args: &CommitArgs, engine: &Engine) -> anyhow::Result<()> {
    let archive = engine.commit(&args.container, &args.image)?;
    println!("{}", archive.display());
    Ok(())
}
