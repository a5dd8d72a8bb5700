//! Batch migration runner.
//!
//! Drives the planner over keyset-paginated batches of active objects at
//! the source schema version. One transaction per applied row (inside the
//! store), a configurable pause between batches, per-row failures recorded
//! as data. A gate refusal stops applying for the remainder of the run
//! (classification continues so the report covers every row) and the run
//! is flagged gated for the CLI's exit code. Dry-run classifies everything
//! and writes nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lattice_core::error::{Error, Result};
use lattice_core::schema::SchemaRegistry;
use lattice_core::traits::MigrationStore;
use lattice_core::types::{MigrationCounts, RiskLevel, RunStatus, SchemaMigrationRun};

use crate::planner::{self, MigrationFlags, PlanOutcome};

/// Parameters of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationRunConfig {
    pub project_id: Uuid,
    pub from_version: String,
    pub to_version: String,
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub flags: MigrationFlags,
    pub dry_run: bool,
}

/// What happened to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    /// New version written
    Applied,
    /// Classified only (dry run, or apply already stopped by the gate)
    Classified,
    /// Gate refused this row
    Blocked,
    /// Planner or storage failure; recorded, not raised
    Error,
}

#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub canonical_id: Uuid,
    pub risk: Option<RiskLevel>,
    pub status: RowStatus,
    pub detail: Option<String>,
}

/// Full run report, the CLI's rendering input.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub counts: MigrationCounts,
    pub status: RunStatus,
    /// True when at least one row was refused by the gate
    pub gated: bool,
    pub dry_run: bool,
    pub rows: Vec<RowOutcome>,
}

pub struct Migrator {
    store: Arc<dyn MigrationStore>,
    registry: Arc<SchemaRegistry>,
}

impl Migrator {
    pub fn new(store: Arc<dyn MigrationStore>, registry: Arc<SchemaRegistry>) -> Self {
        Migrator { store, registry }
    }

    /// Migrate every active object at `from_version` to `to_version`.
    /// Re-running is safe: only rows still at the source version are
    /// touched.
    pub async fn run(&self, config: &MigrationRunConfig) -> Result<MigrationReport> {
        let from_schema = self.registry.at(&config.from_version)?.clone();
        let to_schema = self.registry.at(&config.to_version)?.clone();

        let run_id = Uuid::new_v4();
        self.store
            .record_run(&SchemaMigrationRun {
                id: run_id,
                project_id: config.project_id,
                from_version: config.from_version.clone(),
                to_version: config.to_version.clone(),
                risk_level: RiskLevel::Safe,
                counts: MigrationCounts::default(),
                dry_run: config.dry_run,
                status: RunStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
            })
            .await?;
        info!(%run_id, from = %config.from_version, to = %config.to_version,
              dry_run = config.dry_run, "migration run started");

        let mut counts = MigrationCounts::default();
        let mut rows: Vec<RowOutcome> = Vec::new();
        let mut status = RunStatus::Completed;
        let mut gated = false;
        let mut after: Option<Uuid> = None;

        'batches: loop {
            let batch = match self
                .store
                .fetch_migration_batch(
                    config.project_id,
                    &config.from_version,
                    after,
                    config.batch_size,
                )
                .await
            {
                Ok(batch) => batch,
                Err(error) => {
                    // Non-per-row failure: finalize with error status.
                    warn!(%error, "migration batch fetch failed, aborting run");
                    status = RunStatus::Error;
                    break 'batches;
                }
            };
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|object| object.canonical_id);

            for object in &batch {
                let plan = planner::plan_object(
                    object,
                    &from_schema,
                    &to_schema,
                    &config.flags,
                    Utc::now(),
                );

                match plan.outcome {
                    PlanOutcome::Apply {
                        properties,
                        archive_entry,
                        risk,
                        ..
                    } => {
                        if config.dry_run || gated {
                            bump(&mut counts, risk);
                            rows.push(RowOutcome {
                                canonical_id: object.canonical_id,
                                risk: Some(risk),
                                status: RowStatus::Classified,
                                detail: None,
                            });
                            continue;
                        }

                        let mut archive = object.migration_archive.clone();
                        if let Some(entry) = archive_entry {
                            archive.push(entry);
                        }
                        match self
                            .store
                            .apply_migration(object, properties, &config.to_version, archive)
                            .await
                        {
                            Ok(_) => {
                                bump(&mut counts, risk);
                                rows.push(RowOutcome {
                                    canonical_id: object.canonical_id,
                                    risk: Some(risk),
                                    status: RowStatus::Applied,
                                    detail: None,
                                });
                            }
                            Err(error) => {
                                counts.errors += 1;
                                rows.push(RowOutcome {
                                    canonical_id: object.canonical_id,
                                    risk: Some(risk),
                                    status: RowStatus::Error,
                                    detail: Some(error.to_string()),
                                });
                            }
                        }
                    }
                    PlanOutcome::Blocked { risk, reason } => {
                        counts.blocked += 1;
                        gated = true;
                        rows.push(RowOutcome {
                            canonical_id: object.canonical_id,
                            risk: Some(risk),
                            status: RowStatus::Blocked,
                            detail: Some(reason),
                        });
                    }
                    PlanOutcome::Failed { issues } => {
                        counts.errors += 1;
                        rows.push(RowOutcome {
                            canonical_id: object.canonical_id,
                            risk: Some(RiskLevel::Dangerous),
                            status: RowStatus::Error,
                            detail: Some(issues.join("; ")),
                        });
                    }
                }
            }

            debug!(processed = rows.len(), "migration batch complete");
            if batch.len() < config.batch_size {
                break;
            }
            tokio::time::sleep(config.delay_between_batches).await;
        }

        if let Err(error) = self
            .store
            .finalize_run(run_id, &counts, status, Utc::now())
            .await
        {
            warn!(%error, "failed to finalize migration run audit row");
        }

        info!(%run_id, total = counts.total(), blocked = counts.blocked,
              errors = counts.errors, ?status, "migration run finished");
        Ok(MigrationReport {
            run_id,
            counts,
            status,
            gated,
            dry_run: config.dry_run,
            rows,
        })
    }

    /// Roll objects at `config.from_version` back to `config.to_version`
    /// using their archive entries. Rows without a matching entry are
    /// per-row errors, never guessed.
    pub async fn rollback(&self, config: &MigrationRunConfig) -> Result<MigrationReport> {
        if config.from_version == config.to_version {
            return Err(Error::bad_request(
                "rollback source and target versions are identical",
            ));
        }

        let run_id = Uuid::new_v4();
        self.store
            .record_run(&SchemaMigrationRun {
                id: run_id,
                project_id: config.project_id,
                from_version: config.from_version.clone(),
                to_version: config.to_version.clone(),
                risk_level: RiskLevel::Safe,
                counts: MigrationCounts::default(),
                dry_run: config.dry_run,
                status: RunStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
            })
            .await?;
        info!(%run_id, from = %config.from_version, rollback_to = %config.to_version,
              "rollback run started");

        let mut counts = MigrationCounts::default();
        let mut rows: Vec<RowOutcome> = Vec::new();
        let mut status = RunStatus::Completed;
        let mut after: Option<Uuid> = None;

        'batches: loop {
            let batch = match self
                .store
                .fetch_migration_batch(
                    config.project_id,
                    &config.from_version,
                    after,
                    config.batch_size,
                )
                .await
            {
                Ok(batch) => batch,
                Err(error) => {
                    warn!(%error, "rollback batch fetch failed, aborting run");
                    status = RunStatus::Error;
                    break 'batches;
                }
            };
            if batch.is_empty() {
                break;
            }
            after = batch.last().map(|object| object.canonical_id);

            for object in &batch {
                match planner::plan_rollback(object, &config.to_version) {
                    Ok((properties, archive)) => {
                        if config.dry_run {
                            counts.safe += 1;
                            rows.push(RowOutcome {
                                canonical_id: object.canonical_id,
                                risk: Some(RiskLevel::Safe),
                                status: RowStatus::Classified,
                                detail: None,
                            });
                            continue;
                        }
                        match self
                            .store
                            .apply_migration(object, properties, &config.to_version, archive)
                            .await
                        {
                            Ok(_) => {
                                counts.safe += 1;
                                rows.push(RowOutcome {
                                    canonical_id: object.canonical_id,
                                    risk: Some(RiskLevel::Safe),
                                    status: RowStatus::Applied,
                                    detail: None,
                                });
                            }
                            Err(error) => {
                                counts.errors += 1;
                                rows.push(RowOutcome {
                                    canonical_id: object.canonical_id,
                                    risk: None,
                                    status: RowStatus::Error,
                                    detail: Some(error.to_string()),
                                });
                            }
                        }
                    }
                    Err(error) => {
                        counts.errors += 1;
                        rows.push(RowOutcome {
                            canonical_id: object.canonical_id,
                            risk: None,
                            status: RowStatus::Error,
                            detail: Some(error.to_string()),
                        });
                    }
                }
            }

            if batch.len() < config.batch_size {
                break;
            }
            tokio::time::sleep(config.delay_between_batches).await;
        }

        if let Err(error) = self
            .store
            .finalize_run(run_id, &counts, status, Utc::now())
            .await
        {
            warn!(%error, "failed to finalize rollback run audit row");
        }

        Ok(MigrationReport {
            run_id,
            counts,
            status,
            gated: false,
            dry_run: config.dry_run,
            rows,
        })
    }
}

fn bump(counts: &mut MigrationCounts, risk: RiskLevel) {
    match risk {
        RiskLevel::Safe => counts.safe += 1,
        RiskLevel::Cautious => counts.cautious += 1,
        RiskLevel::Risky => counts.risky += 1,
        RiskLevel::Dangerous => counts.dangerous += 1,
    }
}
