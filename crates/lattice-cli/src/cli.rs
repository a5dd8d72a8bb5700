//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lattice", version, about = "Lattice knowledge engine operations")]
pub struct Cli {
    /// Path to the engine TOML configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the schema catalog JSON (versions and their template packs)
    #[arg(long, global = true, default_value = "schemas.json")]
    pub schemas: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a risk-classified schema migration (or rollback) over a project
    Migrate(MigrateArgs),
    /// Re-embed rows whose embedding is missing
    Backfill(BackfillArgs),
    /// Row counts per storage table
    Stats(StatsArgs),
}

#[derive(Debug, clap::Args)]
pub struct MigrateArgs {
    /// Project to migrate
    #[arg(long)]
    pub project: Uuid,

    /// Source schema version (rows at this version are processed)
    #[arg(long)]
    pub from: String,

    /// Target schema version
    #[arg(long, required_unless_present = "rollback")]
    pub to: Option<String>,

    /// Classify and report without writing anything
    #[arg(long, num_args = 0..=1, default_value_t = true,
          default_missing_value = "true", action = ArgAction::Set)]
    pub dry_run: bool,

    /// Rows per batch
    #[arg(long, default_value_t = 100)]
    pub batch: usize,

    /// Pause between batches, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub delay: u64,

    /// Allow RISKY migrations (fields dropped)
    #[arg(long)]
    pub force: bool,

    /// Together with --force, allow DANGEROUS migrations
    #[arg(long)]
    pub confirm_data_loss: bool,

    /// Do not archive dropped field values
    #[arg(long)]
    pub skip_archive: bool,

    /// Roll back instead of migrating forward
    #[arg(long, requires = "rollback_version")]
    pub rollback: bool,

    /// Version to roll back to (requires --rollback)
    #[arg(long, requires = "rollback")]
    pub rollback_version: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct BackfillArgs {
    /// Project to backfill
    #[arg(long)]
    pub project: Uuid,

    /// Which corpus to re-embed
    #[arg(long, value_parser = ["objects", "relationships", "all"], default_value = "all")]
    pub target: String,

    /// Rows per embedding batch
    #[arg(long, default_value_t = 32)]
    pub batch: usize,
}

#[derive(Debug, clap::Args)]
pub struct StatsArgs {
    /// Output format
    #[arg(long, value_parser = ["table", "json"], default_value = "table")]
    pub format: String,
}
