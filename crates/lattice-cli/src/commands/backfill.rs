//! Embedding backfill command: re-embed rows written while the provider
//! was down.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use lattice_config::LatticeConfig;
use lattice_core::schema::SchemaRegistry;

use crate::cli::BackfillArgs;
use crate::context::{connect, EngineHandles};
use crate::exit::ExitCode;

pub async fn execute(
    config: LatticeConfig,
    registry: SchemaRegistry,
    args: BackfillArgs,
) -> Result<ExitCode> {
    debug!(?args, "executing backfill command");

    let EngineHandles {
        objects,
        relationships,
        ..
    } = connect(&config, registry).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let mut total = 0u64;
    if args.target == "objects" || args.target == "all" {
        spinner.set_message("re-embedding graph objects...");
        let embedded = objects
            .backfill_embeddings(args.project, args.batch, None)
            .await?;
        println!("{} {} graph objects re-embedded", "✓".green(), embedded);
        total += embedded;
    }
    if args.target == "relationships" || args.target == "all" {
        spinner.set_message("re-embedding relationship triplets...");
        let embedded = relationships
            .backfill_embeddings(args.project, args.batch, None)
            .await?;
        println!("{} {} relationships re-embedded", "✓".green(), embedded);
        total += embedded;
    }
    spinner.finish_and_clear();

    println!("Backfill complete: {total} rows embedded");
    Ok(ExitCode::Success)
}
