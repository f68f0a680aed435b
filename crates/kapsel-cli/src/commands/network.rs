//! `kapsel network`: Manage container networks.

use clap::{Args, Subcommand};
use kapsel_common::constants::DEFAULT_NETWORK_DRIVER;
use kapsel_runtime::engine::Engine;

use crate::output;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network.
    Create {
        /// Driver to create the network with.
        #[arg(long, default_value = DEFAULT_NETWORK_DRIVER)]
        driver: String,
        /// Subnet in CIDR notation, e.g. `192.168.0.0/24`.
        #[arg(long)]
        subnet: String,
        /// Network name, also used as the bridge device name.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    Rm {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the network operation fails.
pub fn execute(args: NetworkArgs, engine: &Engine) -> anyhow::Result<()> {
    let networks = engine.network();
    match args.command {
        NetworkCommand::Create {
            driver,
            subnet,
            name,
        } => {
            let network = networks.create_network(&driver, &subnet, &name)?;
            println!("{}", network.name);
        }
        NetworkCommand::List => {
            print!("{}", output::network_table(&networks.list_networks()?));
        }
        NetworkCommand::Rm { name } => {
            networks.delete_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}
