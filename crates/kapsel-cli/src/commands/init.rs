//! `kapsel init`: Container-side setup, run as pid 1 of a new container.

/// Executes the hidden `init` command.
///
/// Only returns when setup or the final exec fails.
///
/// # Errors
///
/// Returns an error describing the failed setup step.
pub fn execute() -> anyhow::Result<()> {
    tracing::debug!("init entered");
    kapsel_runtime::init::run_container_init()?;
    Ok(())
}
