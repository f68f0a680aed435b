//! CLI command definitions and dispatch.

pub mod commit;
pub mod exec;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kapsel_common::config::RuntimeConfig;
use kapsel_common::constants::ROOT_ENV;
use kapsel_runtime::engine::Engine;

/// kapsel, a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "kapsel", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for containers, images, and networks.
    #[arg(long, global = true, env = ROOT_ENV)]
    pub root: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container-side setup. Not for direct use.
    #[command(hide = true)]
    Init,
    /// Pack a container's root filesystem into an image.
    Commit(commit::CommitArgs),
    /// List containers.
    Ps,
    /// Print a container's output.
    Logs(logs::LogsArgs),
    /// Run a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a container.
    Rm(rm::RmArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Command::Init) {
        return init::execute();
    }
    let engine = Engine::new(RuntimeConfig::from_env(cli.root));
    match cli.command {
        Command::Run(args) => run::execute(args, &engine),
        Command::Init => init::execute(),
        Command::Commit(args) => commit::execute(&args, &engine),
        Command::Ps => ps::execute(&engine),
        Command::Logs(args) => logs::execute(&args, &engine),
        Command::Exec(args) => exec::execute(&args, &engine),
        Command::Stop(args) => stop::execute(&args, &engine),
        Command::Rm(args) => rm::execute(&args, &engine),
        Command::Network(args) => network::execute(args, &engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("kapsel").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = parse(&[
            "run", "--name", "web", "--mem", "100m", "--cpu", "20", "-e", "A=1", "-e", "B=2",
            "--net", "testbr", "-p", "8080:80", "busybox", "top", "-b",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            unreachable!("parsed as run");
        };
        assert_eq!(args.image, "busybox");
        assert_eq!(args.command, ["top", "-b"]);
        assert_eq!(args.env, ["A=1", "B=2"]);
        assert_eq!(args.ports, ["8080:80"]);
        assert_eq!(args.cpu, 20);
        assert!(!args.it);
    }

    #[test]
    fn run_rejects_it_with_detach() {
        assert!(parse(&["run", "--it", "-d", "busybox", "sh"]).is_err());
        assert!(parse(&["run", "busybox"]).is_err());
    }

    #[test]
    fn global_root_flag() {
        let cli = parse(&["--root", "/tmp/k", "ps"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/k")));
        assert!(matches!(cli.command, Command::Ps));
    }

    #[test]
    fn network_subcommands() {
        let cli = parse(&[
            "network", "create", "--driver", "bridge", "--subnet", "192.168.0.0/24", "testbr",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Network(_)));
        assert!(parse(&["network", "create", "testbr"]).is_err());
        assert!(parse(&["network", "list"]).is_ok());
        assert!(parse(&["network", "rm", "testbr"]).is_ok());
    }

    #[test]
    fn rm_force_flag() {
        let cli = parse(&["rm", "-f", "abc"]).unwrap();
        let Command::Rm(args) = cli.command else {
            unreachable!("parsed as rm");
        };
        assert!(args.force);
        assert_eq!(args.container, "abc");
    }
}
