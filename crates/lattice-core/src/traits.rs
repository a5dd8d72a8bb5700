//! Trait seams between the engine layers.
//!
//! Core defines the abstractions; `lattice-postgres` and `lattice-embed`
//! implement them; the orchestrator, migrator, and tool surface consume
//! them. This inversion keeps the dependency graph acyclic and lets the
//! higher layers be tested against mocks.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    ArchiveEntry, DocumentChunk, GraphObject, GraphRelationship, MigrationCounts, Properties,
    RunStatus, SchemaMigrationRun,
};

/// Maps text to fixed-dimension embedding vectors via an external provider.
///
/// Callers decide how to handle failure: create paths soft-fail (the row is
/// written with a NULL embedding), query paths degrade (vector probes are
/// skipped).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Vector width produced by this provider (768 across the engine)
    fn dimension(&self) -> usize;

    /// Embed one text. The optional deadline caps time spent including
    /// retries; in-flight requests are interrupted when it passes.
    async fn embed(&self, text: &str, deadline: Option<Instant>) -> Result<Vec<f32>>;

    /// Embed a batch. Order of the output matches the input.
    async fn embed_batch(&self, texts: &[String], deadline: Option<Instant>)
        -> Result<Vec<Vec<f32>>>;
}

/// Object hit with its raw per-stream score (lexical rank or similarity).
#[derive(Debug, Clone)]
pub struct ScoredObject {
    pub object: GraphObject,
    pub score: f64,
}

/// Relationship hit with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredRelationship {
    pub relationship: GraphRelationship,
    pub score: f64,
}

/// Chunk hit with its raw per-stream score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// Filters shared by the graph-object search primitives.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilters {
    /// Restrict to these object types; empty means all
    pub object_types: Vec<String>,
    /// Require every listed label
    pub labels: Vec<String>,
}

/// Search primitives over graph objects, exposed to the orchestrator.
#[async_trait]
pub trait ObjectSearch: Send + Sync {
    /// Full-text probe; scores are `ts_rank` values (unbounded, normalized
    /// per stream by the orchestrator).
    async fn search_objects_fts(
        &self,
        project_id: Uuid,
        query: &str,
        filters: &ObjectFilters,
        limit: usize,
    ) -> Result<Vec<ScoredObject>>;

    /// Vector probe; scores are cosine similarities in [0, 1]. Rows without
    /// an embedding are never candidates.
    async fn search_objects_vector(
        &self,
        project_id: Uuid,
        vector: &[f32],
        filters: &ObjectFilters,
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<ScoredObject>>;
}

/// Vector-only probe over relationship triplets (relationships have no FTS).
#[async_trait]
pub trait TripletSearch: Send + Sync {
    async fn search_triplets(
        &self,
        project_id: Uuid,
        vector: &[f32],
        relationship_types: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredRelationship>>;
}

/// Search primitives over document chunks.
#[async_trait]
pub trait ChunkSearch: Send + Sync {
    async fn search_chunks_fts(
        &self,
        project_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>>;

    async fn search_chunks_vector(
        &self,
        project_id: Uuid,
        vector: &[f32],
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<ScoredChunk>>;
}

/// Bulk `last_accessed_at` stamping, called by the access tracker off the
/// search path.
#[async_trait]
pub trait AccessStamper: Send + Sync {
    /// Returns the number of rows stamped.
    async fn update_access_timestamps(&self, project_id: Uuid, ids: &[Uuid]) -> Result<u64>;
}

/// Storage operations the schema migrator drives.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Fetch the next batch of active objects at `schema_version`, keyset
    /// paginated by canonical id.
    async fn fetch_migration_batch(
        &self,
        project_id: Uuid,
        schema_version: &str,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<GraphObject>>;

    /// Supersede `object` with a new version carrying the migrated payload.
    /// One transaction per row; the archive replaces the row's archive list.
    async fn apply_migration(
        &self,
        object: &GraphObject,
        properties: Properties,
        schema_version: &str,
        migration_archive: Vec<ArchiveEntry>,
    ) -> Result<GraphObject>;

    /// Open the audit row for a run.
    async fn record_run(&self, run: &SchemaMigrationRun) -> Result<()>;

    /// Close the audit row with final counts and status.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        counts: &MigrationCounts,
        status: RunStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Deadline helper: remaining time budget, `None` when no deadline was set.
pub fn remaining(deadline: Option<Instant>) -> Option<std::time::Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}
