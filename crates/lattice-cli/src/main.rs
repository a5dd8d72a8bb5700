//! Lattice command line entry point.

mod cli;
mod commands;
mod context;
mod exit;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use exit::ExitCode;
use lattice_config::LatticeConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code.code()),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            std::process::exit(ExitCode::Aborted.code());
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = LatticeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate(args) => {
            let registry = context::load_registry(&cli.schemas)?;
            commands::migrate::execute(config, registry, args).await
        }
        Commands::Backfill(args) => {
            let registry = context::load_registry(&cli.schemas)?;
            commands::backfill::execute(config, registry, args).await
        }
        Commands::Stats(args) => commands::stats::execute(config, args).await,
    }
}
