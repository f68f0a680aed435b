//! `kapsel run`: Create and start a container.

use clap::Args;
use kapsel_common::types::ResourceConfig;
use kapsel_runtime::engine::{Engine, RunOptions, RunOutcome};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container name. Defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Attach the terminal and wait for the command to finish.
    #[arg(long, conflicts_with = "detach")]
    pub it: bool,

    /// Run in the background with output sent to the container log.
    #[arg(short, long)]
    pub detach: bool,

    /// Memory limit, e.g. `100m`.
    #[arg(long, default_value = "")]
    pub mem: String,

    /// CPU quota in percent of one CPU. 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    pub cpu: u32,

    /// CPUs the container may run on, e.g. `0,1`.
    #[arg(long, default_value = "")]
    pub cpuset: String,

    /// Bind mount, `hostPath:containerPath`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Environment variable, `KEY=VALUE`. Repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Network to attach the container to.
    #[arg(long)]
    pub net: Option<String>,

    /// Port mapping, `hostPort:containerPort`. Repeatable.
    #[arg(short = 'p', long = "publish")]
    pub ports: Vec<String>,

    /// Image name.
    pub image: String,

    /// Command to run.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// Prints the container id when detached. In interactive mode the process
/// exits with the command's status.
///
/// # Errors
///
/// Returns an error if the container cannot be started.
pub fn execute(args: RunArgs, engine: &Engine) -> anyhow::Result<()> {
    let opts = RunOptions {
        resources: ResourceConfig::from_raw(&args.mem, args.cpu, &args.cpuset),
        image: args.image,
        command: args.command,
        name: args.name,
        interactive: args.it && !args.detach,
        volume: args.volume,
        env: args.env,
        network: args.net,
        port_mapping: args.ports,
    };
    tracing::debug!(?opts, "run requested");

    match engine.run(opts)? {
        RunOutcome::Detached(id) => {
            println!("{id}");
            Ok(())
        }
        RunOutcome::Exited { code: 0, .. } => Ok(()),
        RunOutcome::Exited { code, .. } => std::process::exit(code),
    }
}
