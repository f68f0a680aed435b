//! # kapsel
//!
//! Minimal daemon-less container runtime.
//! Single binary for running, inspecting, and removing containers.

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    // `exec` helpers must join namespaces before any thread exists.
    if let Some(result) = kapsel_runtime::exec::namespace_hook() {
        let code = result.unwrap_or_else(|e| {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("kapsel exec: {e}");
            }
            1
        });
        std::process::exit(code);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_json);
    commands::execute(cli)
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
