//! CLI command definitions and dispatch.

pub mod images;
pub mod load;
pub mod rmi;
pub mod run;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use stowage_common::config::StowageConfig;
use stowage_common::constants::DEFAULT_CONFIG_FILE;
use stowage_common::types::Topology;
use stowage_runtime::engine::Engine;

/// Stowage: import `docker save` archives and run them.
#[derive(Parser, Debug)]
#[command(name = "stowage", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Operate on the centralized repository instead of the local one.
    #[arg(long, global = true)]
    pub centralized_repository: bool,

    /// Path to the configuration file.
    #[arg(long, global = true, env = "STOWAGE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log progress at info level.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log details at debug level.
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import an image archive created with `docker save`.
    Load(load::LoadArgs),
    /// List the images in the repository.
    Images(images::ImagesArgs),
    /// Remove an image from the repository.
    Rmi(rmi::RmiArgs),
    /// Run a command inside an imported image and print its output.
    Run(run::RunArgs),
}

/// State shared by every command.
#[derive(Debug)]
pub struct Context {
    /// Repository selected on the command line.
    pub topology: Topology,
    /// Engine over the configured repositories.
    pub engine: Engine,
}

impl Context {
    fn new(cli: &Cli) -> anyhow::Result<Self> {
        let config = StowageConfig::load(&cli.config)
            .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
        Ok(Self {
            topology: Topology::from_centralized_flag(cli.centralized_repository),
            engine: Engine::new(config),
        })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::new(&cli)?;
    match cli.command {
        Command::Load(args) => load::execute(&ctx, args),
        Command::Images(args) => images::execute(&ctx, args),
        Command::Rmi(args) => rmi::execute(&ctx, args),
        Command::Run(args) => run::execute(&ctx, args),
    }
}
