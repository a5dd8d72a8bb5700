//! Schema migration command: dry-run by default, gate-aware exit codes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use tracing::debug;

use lattice_config::LatticeConfig;
use lattice_core::types::RunStatus;
use lattice_migrate::{MigrationFlags, MigrationReport, MigrationRunConfig, Migrator, RowStatus};

use crate::cli::MigrateArgs;
use crate::context::{connect, EngineHandles};
use crate::exit::ExitCode;

pub async fn execute(
    config: LatticeConfig,
    registry: lattice_core::schema::SchemaRegistry,
    args: MigrateArgs,
) -> Result<ExitCode> {
    debug!(?args, "executing migrate command");

    let EngineHandles { objects, .. } = connect(&config, registry.clone()).await?;
    let migrator = Migrator::new(Arc::new(objects), Arc::new(registry));

    // Arg parsing guarantees: --rollback and --rollback-version come as a
    // pair, and --to is required for forward runs.
    let to_version = if args.rollback {
        args.rollback_version
            .clone()
            .expect("guaranteed by arg parsing")
    } else {
        args.to.clone().expect("guaranteed by arg parsing")
    };

    let run_config = MigrationRunConfig {
        project_id: args.project,
        from_version: args.from.clone(),
        to_version,
        batch_size: args.batch,
        delay_between_batches: Duration::from_millis(args.delay),
        flags: MigrationFlags {
            force: args.force,
            confirm_data_loss: args.confirm_data_loss,
            skip_archive: args.skip_archive,
        },
        dry_run: args.dry_run,
    };

    if args.dry_run {
        println!(
            "{}: no rows will be written (pass --dry-run false to apply)",
            "DRY RUN".yellow().bold()
        );
    }

    let report = if args.rollback {
        println!(
            "Rolling back project {} rows at {} to {}",
            args.project,
            run_config.from_version.cyan(),
            run_config.to_version.cyan()
        );
        migrator.rollback(&run_config).await?
    } else {
        println!(
            "Migrating project {} from {} to {}",
            args.project,
            run_config.from_version.cyan(),
            run_config.to_version.cyan()
        );
        migrator.run(&run_config).await?
    };

    render_report(&report);
    Ok(exit_code_for(&report))
}

fn render_report(report: &MigrationReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Outcome", "Count"]);
    table.add_row(vec![Cell::new("safe"), Cell::new(report.counts.safe)]);
    table.add_row(vec![Cell::new("cautious"), Cell::new(report.counts.cautious)]);
    table.add_row(vec![Cell::new("risky"), Cell::new(report.counts.risky)]);
    table.add_row(vec![
        Cell::new("dangerous"),
        Cell::new(report.counts.dangerous),
    ]);
    table.add_row(vec![Cell::new("blocked"), Cell::new(report.counts.blocked)]);
    table.add_row(vec![Cell::new("errors"), Cell::new(report.counts.errors)]);
    println!("{table}");

    // Show the first few problem rows so the operator can act on them.
    let problems: Vec<_> = report
        .rows
        .iter()
        .filter(|row| matches!(row.status, RowStatus::Blocked | RowStatus::Error))
        .take(10)
        .collect();
    if !problems.is_empty() {
        println!("\nProblem rows (first {}):", problems.len());
        for row in problems {
            let label = match row.status {
                RowStatus::Blocked => "blocked".yellow(),
                _ => "error".red(),
            };
            println!(
                "  {} {} {}",
                label,
                row.canonical_id,
                row.detail.as_deref().unwrap_or("")
            );
        }
    }

    match report.status {
        RunStatus::Error => println!("\n{}: run aborted", "FAILED".red().bold()),
        _ if report.gated => println!(
            "\n{}: blocked migrations found; re-run with --force (and --confirm-data-loss for dangerous ones)",
            "GATED".yellow().bold()
        ),
        _ if report.counts.errors > 0 => println!(
            "\n{}: completed with per-row errors",
            "PARTIAL".yellow().bold()
        ),
        _ => println!(
            "\n{} run {} complete ({} rows)",
            "✓".green(),
            report.run_id,
            report.counts.total()
        ),
    }
}

fn exit_code_for(report: &MigrationReport) -> ExitCode {
    if report.status == RunStatus::Error {
        ExitCode::Aborted
    } else if report.counts.blocked > 0 {
        ExitCode::Gated
    } else if report.counts.errors > 0 {
        ExitCode::RowErrors
    } else {
        ExitCode::Success
    }
}
