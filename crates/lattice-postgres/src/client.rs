//! Connection handling and error translation for the Postgres backend.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use lattice_config::StorageConfig;
use lattice_core::error::{Error, Result};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Thin transactional facade over the relational engine.
///
/// Holds the bounded connection pool; the stores borrow it for their
/// queries and open transactions for multi-statement write units.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connect with the configured pool bounds and per-session statement
    /// timeout.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let statement_timeout = config.statement_timeout_ms;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_conns)
            .acquire_timeout(Duration::from_secs(30))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::Executor::execute(
                        conn,
                        format!("SET statement_timeout = {statement_timeout}").as_str(),
                    )
                    .await?;
                    Ok(())
                })
            })
            .connect(&config.dsn)
            .await
            .map_err(map_sqlx_err)?;

        info!(max_conns = config.max_conns, "connected to postgres");
        Ok(Storage { pool })
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Storage { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the idempotent bootstrap DDL: extensions, tables, indexes.
    pub async fn ensure_schema(&self) -> Result<()> {
        debug!("applying storage bootstrap DDL");
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    /// Row counts per table, for the stats surface.
    pub async fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut counts = Vec::new();
        for table in [
            "documents",
            "document_chunks",
            "graph_objects",
            "graph_relationships",
            "schema_migration_runs",
        ] {
            let row: (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
            counts.push((table.to_string(), row.0));
        }
        Ok(counts)
    }
}

/// Translate sqlx failures into the canonical error set so the stores can
/// surface `Conflict` / `RetryableIo` without leaking driver types.
pub(crate) fn map_sqlx_err(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::not_found("row"),
        sqlx::Error::PoolTimedOut => {
            Error::RetryableIo("connection pool exhausted".to_string())
        }
        sqlx::Error::Io(e) => Error::RetryableIo(format!("database i/o error: {e}")),
        sqlx::Error::Database(db) => match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation => Error::conflict(db.message().to_string()),
            sqlx::error::ErrorKind::ForeignKeyViolation => {
                Error::not_found(format!("referenced row missing: {}", db.message()))
            }
            _ => Error::Storage(db.message().to_string()),
        },
        _ => Error::Storage(err.to_string()),
    }
}
