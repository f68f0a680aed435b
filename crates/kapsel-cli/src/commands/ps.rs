//! `kapsel ps`: List containers.

use kapsel_runtime::engine::Engine;

use crate::output;

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container directory cannot be read.
pub fn execute(engine: &Engine) -> anyhow::Result<()> {
    let containers = engine.list()?;
    print!("{}", output::container_table(&containers));
    Ok(())
}
