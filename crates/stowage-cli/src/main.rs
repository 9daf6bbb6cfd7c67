//! # stowage: image import CLI
//!
//! Loads `docker save` archives into a local or centralized repository
//! and runs commands inside the imported images.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, cli.debug))
        .with_writer(std::io::stderr)
        .init();

    commands::execute(cli)
}

/// `--debug` wins over `--verbose`; without either, `RUST_LOG` or `warn`.
fn log_filter(verbose: bool, debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}
