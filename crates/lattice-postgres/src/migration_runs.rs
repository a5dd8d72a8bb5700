//! Audit store for schema migration runs.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use lattice_core::error::{Error, Result};
use lattice_core::types::{MigrationCounts, RiskLevel, RunStatus, SchemaMigrationRun};

use crate::client::{map_sqlx_err, Storage};

#[derive(Clone)]
pub struct MigrationRunStore {
    storage: Storage,
}

impl MigrationRunStore {
    pub fn new(storage: Storage) -> Self {
        MigrationRunStore { storage }
    }

    pub async fn insert(&self, run: &SchemaMigrationRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO schema_migration_runs \
             (id, project_id, from_version, to_version, risk_level, safe_count, cautious_count, \
              risky_count, dangerous_count, blocked_count, error_count, dry_run, status, \
              started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(run.id)
        .bind(run.project_id)
        .bind(&run.from_version)
        .bind(&run.to_version)
        .bind(run.risk_level.to_string())
        .bind(run.counts.safe as i64)
        .bind(run.counts.cautious as i64)
        .bind(run.counts.risky as i64)
        .bind(run.counts.dangerous as i64)
        .bind(run.counts.blocked as i64)
        .bind(run.counts.errors as i64)
        .bind(run.dry_run)
        .bind(run.status.to_string())
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn finalize(
        &self,
        run_id: Uuid,
        counts: &MigrationCounts,
        status: RunStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schema_migration_runs SET \
                 risk_level = $2, safe_count = $3, cautious_count = $4, risky_count = $5, \
                 dangerous_count = $6, blocked_count = $7, error_count = $8, status = $9, \
                 completed_at = $10 \
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(counts.max_risk().to_string())
        .bind(counts.safe as i64)
        .bind(counts.cautious as i64)
        .bind(counts.risky as i64)
        .bind(counts.dangerous as i64)
        .bind(counts.blocked as i64)
        .bind(counts.errors as i64)
        .bind(status.to_string())
        .bind(completed_at)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("migration run {run_id}")));
        }
        Ok(())
    }

    /// Most recent runs for a project, newest first.
    pub async fn list(&self, project_id: Uuid, limit: i64) -> Result<Vec<SchemaMigrationRun>> {
        let rows = sqlx::query(
            "SELECT id, project_id, from_version, to_version, risk_level, safe_count, \
                    cautious_count, risky_count, dangerous_count, blocked_count, error_count, \
                    dry_run, status, started_at, completed_at \
             FROM schema_migration_runs WHERE project_id = $1 \
             ORDER BY started_at DESC LIMIT $2",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        rows.iter().map(run_from_row).collect()
    }
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<SchemaMigrationRun> {
    fn get<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<T, _>(name)
            .map_err(|e| Error::Storage(format!("failed to decode column '{name}': {e}")))
    }

    let risk: String = get(row, "risk_level")?;
    let status: String = get(row, "status")?;

    Ok(SchemaMigrationRun {
        id: get(row, "id")?,
        project_id: get(row, "project_id")?,
        from_version: get(row, "from_version")?,
        to_version: get(row, "to_version")?,
        risk_level: parse_risk(&risk)?,
        counts: MigrationCounts {
            safe: get::<i64>(row, "safe_count")? as u64,
            cautious: get::<i64>(row, "cautious_count")? as u64,
            risky: get::<i64>(row, "risky_count")? as u64,
            dangerous: get::<i64>(row, "dangerous_count")? as u64,
            blocked: get::<i64>(row, "blocked_count")? as u64,
            errors: get::<i64>(row, "error_count")? as u64,
        },
        dry_run: get(row, "dry_run")?,
        status: parse_status(&status)?,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

fn parse_risk(s: &str) -> Result<RiskLevel> {
    match s {
        "safe" => Ok(RiskLevel::Safe),
        "cautious" => Ok(RiskLevel::Cautious),
        "risky" => Ok(RiskLevel::Risky),
        "dangerous" => Ok(RiskLevel::Dangerous),
        other => Err(Error::Storage(format!("unknown risk level '{other}'"))),
    }
}

fn parse_status(s: &str) -> Result<RunStatus> {
    match s {
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "error" => Ok(RunStatus::Error),
        other => Err(Error::Storage(format!("unknown run status '{other}'"))),
    }
}
