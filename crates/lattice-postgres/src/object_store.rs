//! Versioned graph object store.
//!
//! Every edit inserts a new row and supersedes the previous one inside a
//! single transaction; the partial unique index on active canonical ids is
//! the concurrency backstop. Embeddings are computed from the type schema's
//! projection of the properties and soft-fail to NULL.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use pgvector::Vector;
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use lattice_core::error::{Error, Result};
use lattice_core::schema::{SchemaRegistry, TypeSchema};
use lattice_core::traits::{
    AccessStamper, EmbeddingProvider, MigrationStore, ObjectFilters, ObjectSearch, ScoredObject,
};
use lattice_core::types::{
    ArchiveEntry, GraphObject, GraphRelationship, MigrationCounts, Properties, RunStatus,
    SchemaMigrationRun,
};
use lattice_core::validate::{merge_properties, validate_properties};

use crate::client::{map_sqlx_err, Storage};
use crate::migration_runs::MigrationRunStore;
use crate::row::{object_from_row, relationship_from_row, OBJECT_COLUMNS, RELATIONSHIP_COLUMNS};

/// Arguments for creating a graph object.
#[derive(Debug, Clone, Default)]
pub struct CreateObject {
    pub object_type: String,
    pub properties: Properties,
    pub labels: Vec<String>,
    pub key: Option<String>,
    pub status: Option<String>,
    pub actor_id: Option<Uuid>,
    /// Defaults to the registry's current schema version
    pub schema_version: Option<String>,
}

/// Patch delta; properties merge shallowly, explicit `null` removes a key.
#[derive(Debug, Clone, Default)]
pub struct PatchObject {
    pub properties: Option<Properties>,
    pub labels: Option<Vec<String>>,
    pub status: Option<String>,
}

/// Filters for project-scoped listings.
#[derive(Debug, Clone)]
pub struct ListObjects {
    pub object_type: Option<String>,
    pub status: Option<String>,
    pub labels: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListObjects {
    fn default() -> Self {
        ListObjects {
            object_type: None,
            status: None,
            labels: Vec::new(),
            limit: 50,
            offset: 0,
        }
    }
}

/// Active relationships touching one object, split by direction.
#[derive(Debug, Clone, Default)]
pub struct ObjectEdges {
    pub incoming: Vec<GraphRelationship>,
    pub outgoing: Vec<GraphRelationship>,
}

#[derive(Clone)]
pub struct ObjectStore {
    storage: Storage,
    registry: Arc<SchemaRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl ObjectStore {
    pub fn new(
        storage: Storage,
        registry: Arc<SchemaRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        ObjectStore {
            storage,
            registry,
            embedder,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Create version 1 of a new object. The property payload is validated
    /// against the type schema; the embedding is computed from the schema's
    /// projection and stored as NULL when the provider fails.
    pub async fn create(
        &self,
        project_id: Uuid,
        args: CreateObject,
        deadline: Option<Instant>,
    ) -> Result<GraphObject> {
        let schema_version = args
            .schema_version
            .unwrap_or_else(|| self.registry.current_version().to_string());
        let schema = self.registry.at(&schema_version)?;
        let type_schema = schema.object_type(&args.object_type)?;
        validate_properties(type_schema, &args.properties)?;

        let embedding = self
            .compute_embedding(type_schema, &args.properties, deadline)
            .await;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let object = GraphObject {
            id,
            canonical_id: id,
            project_id,
            object_type: args.object_type,
            version: 1,
            key: args.key,
            properties: args.properties,
            status: args.status,
            labels: args.labels,
            actor_id: args.actor_id,
            embedding,
            schema_version,
            migration_archive: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            last_accessed_at: None,
        };

        self.insert_version(self.storage.pool(), &object).await?;
        debug!(id = %object.id, object_type = %object.object_type, "created graph object");
        Ok(object)
    }

    /// Fetch one exact version row by its id.
    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<GraphObject> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects WHERE project_id = $1 AND id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| Error::not_found(format!("graph object {id}")))?;
        object_from_row(&row)
    }

    /// Fetch the active version for a canonical id.
    pub async fn get_active(&self, project_id: Uuid, canonical_id: Uuid) -> Result<GraphObject> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND canonical_id = $2 AND deleted_at IS NULL \
             ORDER BY version DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_optional(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| Error::not_found(format!("active graph object {canonical_id}")))?;
        object_from_row(&row)
    }

    /// Apply a patch to the active version, producing the next version.
    /// The embedding is recomputed only when the delta touches a field of
    /// the embedding projection.
    pub async fn patch(
        &self,
        project_id: Uuid,
        id: Uuid,
        patch: PatchObject,
        deadline: Option<Instant>,
    ) -> Result<GraphObject> {
        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;

        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND id = $2 AND deleted_at IS NULL FOR UPDATE"
        );
        let prev = sqlx::query(&sql)
            .bind(project_id)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(|row| object_from_row(&row))
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("active graph object {id}")))?;

        let (merged, changed) = match &patch.properties {
            Some(delta) => merge_properties(&prev.properties, delta),
            None => (prev.properties.clone(), Vec::new()),
        };

        let schema = self.registry.at(&prev.schema_version)?;
        let type_schema = schema.object_type(&prev.object_type)?;
        validate_properties(type_schema, &merged)?;

        let embedding = if type_schema.projection_touched(&changed) {
            self.compute_embedding(type_schema, &merged, deadline).await
        } else {
            prev.embedding.clone()
        };

        let now = Utc::now();
        let next = GraphObject {
            id: Uuid::new_v4(),
            canonical_id: prev.canonical_id,
            project_id,
            object_type: prev.object_type.clone(),
            version: prev.version + 1,
            key: prev.key.clone(),
            properties: merged,
            status: patch.status.or_else(|| prev.status.clone()),
            labels: patch.labels.unwrap_or_else(|| prev.labels.clone()),
            actor_id: prev.actor_id,
            embedding,
            schema_version: prev.schema_version.clone(),
            migration_archive: prev.migration_archive.clone(),
            created_at: prev.created_at,
            updated_at: now,
            deleted_at: None,
            last_accessed_at: prev.last_accessed_at,
        };

        self.supersede(&mut tx, prev.id).await?;
        self.insert_version(&mut *tx, &next).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(canonical_id = %next.canonical_id, version = next.version, "patched graph object");
        Ok(next)
    }

    /// Tombstone the active version of the chain that `id` belongs to.
    /// The id may be any version of the chain.
    pub async fn delete(&self, project_id: Uuid, id: Uuid) -> Result<()> {
        let row = sqlx::query(
            "SELECT canonical_id FROM graph_objects WHERE project_id = $1 AND id = $2",
        )
        .bind(project_id)
        .bind(id)
        .fetch_optional(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::not_found(format!("graph object {id}")))?;
        let canonical_id: Uuid = row
            .try_get("canonical_id")
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE graph_objects SET deleted_at = $3, updated_at = $3 \
             WHERE project_id = $1 AND canonical_id = $2 AND deleted_at IS NULL",
        )
        .bind(project_id)
        .bind(canonical_id)
        .bind(Utc::now())
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "no active version for graph object {canonical_id}"
            )));
        }
        debug!(%canonical_id, "tombstoned graph object");
        Ok(())
    }

    /// Bring a tombstoned chain back: a new version with a cleared
    /// tombstone, carrying the payload of the given tombstone row.
    pub async fn restore(&self, project_id: Uuid, tombstone_id: Uuid) -> Result<GraphObject> {
        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;

        let sql =
            format!("SELECT {OBJECT_COLUMNS} FROM graph_objects WHERE project_id = $1 AND id = $2");
        let tombstone = sqlx::query(&sql)
            .bind(project_id)
            .bind(tombstone_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(|row| object_from_row(&row))
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("graph object {tombstone_id}")))?;

        if tombstone.deleted_at.is_none() {
            return Err(Error::bad_request(format!(
                "graph object {tombstone_id} is not tombstoned"
            )));
        }

        let row = sqlx::query(
            "SELECT max(version) AS max_version, \
                    bool_or(deleted_at IS NULL) AS has_active \
             FROM graph_objects WHERE canonical_id = $1",
        )
        .bind(tombstone.canonical_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;
        let max_version: Option<i32> = row
            .try_get("max_version")
            .map_err(|e| Error::Storage(e.to_string()))?;
        let has_active: Option<bool> = row
            .try_get("has_active")
            .map_err(|e| Error::Storage(e.to_string()))?;

        if has_active.unwrap_or(false) {
            return Err(Error::conflict(format!(
                "graph object {} already has an active version",
                tombstone.canonical_id
            )));
        }

        let now = Utc::now();
        let restored = GraphObject {
            id: Uuid::new_v4(),
            version: max_version.unwrap_or(tombstone.version) + 1,
            updated_at: now,
            deleted_at: None,
            ..tombstone
        };

        self.insert_version(&mut *tx, &restored).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(canonical_id = %restored.canonical_id, version = restored.version, "restored graph object");
        Ok(restored)
    }

    /// Full version chain, newest first.
    pub async fn history(&self, project_id: Uuid, canonical_id: Uuid) -> Result<Vec<GraphObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND canonical_id = $2 ORDER BY version DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("graph object {canonical_id}")));
        }
        rows.iter().map(object_from_row).collect()
    }

    /// Active relationships touching this canonical id, split by direction.
    pub async fn edges(&self, project_id: Uuid, canonical_id: Uuid) -> Result<ObjectEdges> {
        let outgoing_sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND src_id = $2 AND deleted_at IS NULL \
             ORDER BY updated_at DESC, id"
        );
        let incoming_sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND dst_id = $2 AND deleted_at IS NULL \
             ORDER BY updated_at DESC, id"
        );

        let outgoing = sqlx::query(&outgoing_sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .iter()
            .map(relationship_from_row)
            .collect::<Result<Vec<_>>>()?;
        let incoming = sqlx::query(&incoming_sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .iter()
            .map(relationship_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(ObjectEdges { incoming, outgoing })
    }

    /// Project-scoped listing of active objects.
    pub async fn list(&self, project_id: Uuid, args: ListObjects) -> Result<Vec<GraphObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND deleted_at IS NULL \
               AND ($2::text IS NULL OR type = $2) \
               AND ($3::text IS NULL OR status = $3) \
               AND (cardinality($4::text[]) = 0 OR labels @> $4) \
             ORDER BY updated_at DESC, id LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(args.object_type)
            .bind(args.status)
            .bind(args.labels)
            .bind(args.limit)
            .bind(args.offset)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(object_from_row).collect()
    }

    /// Re-embed active objects whose embedding is NULL, in batches. Returns
    /// the number of rows that received an embedding.
    pub async fn backfill_embeddings(
        &self,
        project_id: Uuid,
        batch_size: usize,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND deleted_at IS NULL AND embedding IS NULL \
             ORDER BY id"
        );

        let mut total = 0u64;
        let mut pending: Vec<(Uuid, String)> = Vec::new();
        {
            let mut stream = sqlx::query(&sql).bind(project_id).fetch(self.storage.pool());
            while let Some(row) = stream.try_next().await.map_err(map_sqlx_err)? {
                let object = object_from_row(&row)?;
                let projection = self
                    .registry
                    .at(&object.schema_version)
                    .ok()
                    .and_then(|schema| schema.object_type(&object.object_type).ok())
                    .and_then(|ts| ts.embedding_projection(&object.properties));
                if let Some(text) = projection {
                    pending.push((object.id, text));
                }
                if pending.len() >= batch_size {
                    total += self.flush_backfill(&pending, deadline).await?;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            total += self.flush_backfill(&pending, deadline).await?;
        }

        debug!(%project_id, embedded = total, "object embedding backfill complete");
        Ok(total)
    }

    async fn flush_backfill(
        &self,
        pending: &[(Uuid, String)],
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts, deadline).await?;

        let mut updated = 0u64;
        for ((id, _), vector) in pending.iter().zip(vectors) {
            let result = sqlx::query("UPDATE graph_objects SET embedding = $2 WHERE id = $1")
                .bind(id)
                .bind(Vector::from(vector))
                .execute(self.storage.pool())
                .await
                .map_err(map_sqlx_err)?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn compute_embedding(
        &self,
        type_schema: &TypeSchema,
        properties: &Properties,
        deadline: Option<Instant>,
    ) -> Option<Vec<f32>> {
        let text = type_schema.embedding_projection(properties)?;
        match self.embedder.embed(&text, deadline).await {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(%error, "object embedding failed, storing NULL");
                None
            }
        }
    }

    async fn supersede(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        row_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE graph_objects SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(row_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() != 1 {
            return Err(Error::conflict(format!(
                "graph object row {row_id} was superseded concurrently"
            )));
        }
        Ok(())
    }

    async fn insert_version<'e, E>(&self, executor: E, object: &GraphObject) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO graph_objects \
             (id, canonical_id, project_id, type, version, key, properties, status, labels, \
              actor_id, embedding, schema_version, migration_archive, created_at, updated_at, \
              deleted_at, last_accessed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(object.id)
        .bind(object.canonical_id)
        .bind(object.project_id)
        .bind(&object.object_type)
        .bind(object.version)
        .bind(&object.key)
        .bind(serde_json::Value::Object(object.properties.clone()))
        .bind(&object.status)
        .bind(&object.labels)
        .bind(object.actor_id)
        .bind(object.embedding.clone().map(Vector::from))
        .bind(&object.schema_version)
        .bind(serde_json::to_value(&object.migration_archive).unwrap_or_default())
        .bind(object.created_at)
        .bind(object.updated_at)
        .bind(object.deleted_at)
        .bind(object.last_accessed_at)
        .execute(executor)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectSearch for ObjectStore {
    async fn search_objects_fts(
        &self,
        project_id: Uuid,
        query: &str,
        filters: &ObjectFilters,
        limit: usize,
    ) -> Result<Vec<ScoredObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS}, \
                    ts_rank(fts_vector, websearch_to_tsquery('english', $2))::float8 AS score \
             FROM graph_objects \
             WHERE project_id = $1 AND deleted_at IS NULL \
               AND fts_vector @@ websearch_to_tsquery('english', $2) \
               AND (cardinality($3::text[]) = 0 OR type = ANY($3)) \
               AND (cardinality($4::text[]) = 0 OR labels @> $4) \
             ORDER BY score DESC, updated_at DESC, id LIMIT $5"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(query)
            .bind(&filters.object_types)
            .bind(&filters.labels)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row
                    .try_get("score")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Ok(ScoredObject {
                    object: object_from_row(row)?,
                    score,
                })
            })
            .collect()
    }

    async fn search_objects_vector(
        &self,
        project_id: Uuid,
        vector: &[f32],
        filters: &ObjectFilters,
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<ScoredObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS}, 1 - (embedding <=> $2) AS score \
             FROM graph_objects \
             WHERE project_id = $1 AND deleted_at IS NULL AND embedding IS NOT NULL \
               AND (cardinality($3::text[]) = 0 OR type = ANY($3)) \
               AND (cardinality($4::text[]) = 0 OR labels @> $4) \
               AND ($5::float8 IS NULL OR (embedding <=> $2) <= $5) \
             ORDER BY embedding <=> $2, updated_at DESC, id LIMIT $6"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(Vector::from(vector.to_vec()))
            .bind(&filters.object_types)
            .bind(&filters.labels)
            .bind(max_distance)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row
                    .try_get("score")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Ok(ScoredObject {
                    object: object_from_row(row)?,
                    score,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AccessStamper for ObjectStore {
    async fn update_access_timestamps(&self, project_id: Uuid, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE graph_objects SET last_accessed_at = now() \
             WHERE project_id = $1 AND id = ANY($2)",
        )
        .bind(project_id)
        .bind(ids)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MigrationStore for ObjectStore {
    async fn fetch_migration_batch(
        &self,
        project_id: Uuid,
        schema_version: &str,
        after: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<GraphObject>> {
        let sql = format!(
            "SELECT {OBJECT_COLUMNS} FROM graph_objects \
             WHERE project_id = $1 AND deleted_at IS NULL AND schema_version = $2 \
               AND ($3::uuid IS NULL OR canonical_id > $3) \
             ORDER BY canonical_id LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(schema_version)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(object_from_row).collect()
    }

    async fn apply_migration(
        &self,
        object: &GraphObject,
        properties: Properties,
        schema_version: &str,
        migration_archive: Vec<ArchiveEntry>,
    ) -> Result<GraphObject> {
        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;

        let now = Utc::now();
        let next = GraphObject {
            id: Uuid::new_v4(),
            version: object.version + 1,
            properties,
            schema_version: schema_version.to_string(),
            migration_archive,
            updated_at: now,
            deleted_at: None,
            ..object.clone()
        };

        self.supersede(&mut tx, object.id).await?;
        self.insert_version(&mut *tx, &next).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(next)
    }

    async fn record_run(&self, run: &SchemaMigrationRun) -> Result<()> {
        MigrationRunStore::new(self.storage.clone()).insert(run).await
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        counts: &MigrationCounts,
        status: RunStatus,
        completed_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        MigrationRunStore::new(self.storage.clone())
            .finalize(run_id, counts, status, completed_at)
            .await
    }
}
