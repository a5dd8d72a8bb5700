//! Versioned relationship store.
//!
//! Relationships are typed directed edges between object canonical ids.
//! Creation resolves both active endpoints, validates the edge against the
//! registered relationship type, builds the natural-language triplet text,
//! and attaches its embedding inside the same transaction; embedding
//! failure never blocks the write.

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
use lattice_core::schema::SchemaRegistry;
use lattice_core::traits::{EmbeddingProvider, ScoredRelationship, TripletSearch};
use lattice_core::types::{triplet_text, GraphRelationship, Properties};
use lattice_core::validate::{merge_properties, validate_relationship};

use crate::client::{map_sqlx_err, Storage};
use crate::object_store::ObjectStore;
use crate::row::{relationship_from_row, RELATIONSHIP_COLUMNS};

/// Arguments for creating a relationship.
#[derive(Debug, Clone, Default)]
pub struct CreateRelationship {
    pub rel_type: String,
    pub src_id: Uuid,
    pub dst_id: Uuid,
    pub properties: Properties,
    pub weight: Option<f64>,
}

/// Patch delta; endpoints and type are immutable across versions.
#[derive(Debug, Clone, Default)]
pub struct PatchRelationship {
    pub properties: Option<Properties>,
    pub weight: Option<f64>,
}

/// Filters for project-scoped relationship listings.
#[derive(Debug, Clone)]
pub struct ListRelationships {
    pub rel_type: Option<String>,
    pub src_id: Option<Uuid>,
    pub dst_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListRelationships {
    fn default() -> Self {
        ListRelationships {
            rel_type: None,
            src_id: None,
            dst_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Clone)]
pub struct RelationshipStore {
    storage: Storage,
    objects: ObjectStore,
    registry: Arc<SchemaRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RelationshipStore {
    pub fn new(
        storage: Storage,
        objects: ObjectStore,
        registry: Arc<SchemaRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        RelationshipStore {
            storage,
            objects,
            registry,
            embedder,
        }
    }

    /// Create a relationship, or return the existing active one when the
    /// same (type, src, dst) already exists with identical properties.
    /// Differing properties supersede the existing edge with a new version.
    pub async fn create(
        &self,
        project_id: Uuid,
        args: CreateRelationship,
        deadline: Option<Instant>,
    ) -> Result<GraphRelationship> {
        if args.src_id == args.dst_id {
            return Err(Error::validation(
                "dst_id",
                "self-referencing relationships are not permitted",
            ));
        }

        let src = self.objects.get_active(project_id, args.src_id).await?;
        let dst = self.objects.get_active(project_id, args.dst_id).await?;

        let schema = self.registry.current();
        let rel_schema = schema.relationship_type(&args.rel_type)?;
        validate_relationship(rel_schema, &src.object_type, &dst.object_type, &args.properties)?;

        // Idempotency: byte-equal properties return the active edge as-is.
        let existing = self
            .find_active(project_id, &args.rel_type, args.src_id, args.dst_id)
            .await?;
        if let Some(existing) = existing {
            if existing.properties == args.properties {
                debug!(id = %existing.id, "relationship create is idempotent, returning existing");
                return Ok(existing);
            }
            return self
                .supersede_with(project_id, existing, args, &src, &dst, deadline)
                .await;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let triplet = triplet_text(&src, &args.rel_type, &dst);
        let mut relationship = GraphRelationship {
            id,
            canonical_id: id,
            project_id,
            src_id: args.src_id,
            dst_id: args.dst_id,
            rel_type: args.rel_type,
            version: 1,
            properties: args.properties,
            weight: args.weight,
            embedding: None,
            embedding_updated_at: None,
            triplet_text: Some(triplet),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;
        self.insert_version(&mut *tx, &relationship).await?;
        self.embed_in_unit(&mut tx, &mut relationship, deadline).await;
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(id = %relationship.id, rel_type = %relationship.rel_type, "created relationship");
        Ok(relationship)
    }

    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<GraphRelationship> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .bind(id)
            .fetch_optional(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| Error::not_found(format!("relationship {id}")))?;
        relationship_from_row(&row)
    }

    pub async fn get_active(&self, project_id: Uuid, canonical_id: Uuid) -> Result<GraphRelationship> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND canonical_id = $2 AND deleted_at IS NULL \
             ORDER BY version DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_optional(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| Error::not_found(format!("active relationship {canonical_id}")))?;
        relationship_from_row(&row)
    }

    /// Patch the active version. Endpoints are preserved; the triplet text
    /// is re-resolved from the current active endpoints and re-embedded when
    /// it changed.
    pub async fn patch(
        &self,
        project_id: Uuid,
        id: Uuid,
        patch: PatchRelationship,
        deadline: Option<Instant>,
    ) -> Result<GraphRelationship> {
        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;

        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND id = $2 AND deleted_at IS NULL FOR UPDATE"
        );
        let prev = sqlx::query(&sql)
            .bind(project_id)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(|row| relationship_from_row(&row))
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("active relationship {id}")))?;

        let (merged, _changed) = match &patch.properties {
            Some(delta) => merge_properties(&prev.properties, delta),
            None => (prev.properties.clone(), Vec::new()),
        };

        let src = self.objects.get_active(project_id, prev.src_id).await?;
        let dst = self.objects.get_active(project_id, prev.dst_id).await?;
        let rel_schema = self.registry.current().relationship_type(&prev.rel_type)?;
        validate_relationship(rel_schema, &src.object_type, &dst.object_type, &merged)?;

        let triplet = triplet_text(&src, &prev.rel_type, &dst);
        let triplet_changed = prev.triplet_text.as_deref() != Some(triplet.as_str());

        let now = Utc::now();
        let mut next = GraphRelationship {
            id: Uuid::new_v4(),
            version: prev.version + 1,
            properties: merged,
            weight: patch.weight.or(prev.weight),
            triplet_text: Some(triplet),
            updated_at: now,
            deleted_at: None,
            ..prev.clone()
        };
        if triplet_changed {
            // A stale vector is worse than none; re-embed or store NULL.
            next.embedding = None;
            next.embedding_updated_at = None;
        }

        self.supersede(&mut tx, prev.id).await?;
        self.insert_version(&mut *tx, &next).await?;
        if triplet_changed {
            self.embed_in_unit(&mut tx, &mut next, deadline).await;
        }
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(canonical_id = %next.canonical_id, version = next.version, "patched relationship");
        Ok(next)
    }

    /// Tombstone the active version of the chain that `id` belongs to.
    pub async fn delete(&self, project_id: Uuid, id: Uuid) -> Result<()> {
        let row = sqlx::query(
            "SELECT canonical_id FROM graph_relationships WHERE project_id = $1 AND id = $2",
        )
        .bind(project_id)
        .bind(id)
        .fetch_optional(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::not_found(format!("relationship {id}")))?;
        let canonical_id: Uuid = row
            .try_get("canonical_id")
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE graph_relationships SET deleted_at = $3, updated_at = $3 \
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
                "no active version for relationship {canonical_id}"
            )));
        }
        debug!(%canonical_id, "tombstoned relationship");
        Ok(())
    }

    /// New active version from a tombstone, mirroring the object store.
    pub async fn restore(&self, project_id: Uuid, tombstone_id: Uuid) -> Result<GraphRelationship> {
        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;

        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND id = $2"
        );
        let tombstone = sqlx::query(&sql)
            .bind(project_id)
            .bind(tombstone_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(|row| relationship_from_row(&row))
            .transpose()?
            .ok_or_else(|| Error::not_found(format!("relationship {tombstone_id}")))?;

        if tombstone.deleted_at.is_none() {
            return Err(Error::bad_request(format!(
                "relationship {tombstone_id} is not tombstoned"
            )));
        }

        let row = sqlx::query(
            "SELECT max(version) AS max_version, \
                    bool_or(deleted_at IS NULL) AS has_active \
             FROM graph_relationships WHERE canonical_id = $1",
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
                "relationship {} already has an active version",
                tombstone.canonical_id
            )));
        }

        let restored = GraphRelationship {
            id: Uuid::new_v4(),
            version: max_version.unwrap_or(tombstone.version) + 1,
            updated_at: Utc::now(),
            deleted_at: None,
            ..tombstone
        };

        self.insert_version(&mut *tx, &restored).await?;
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(canonical_id = %restored.canonical_id, version = restored.version, "restored relationship");
        Ok(restored)
    }

    /// Full version chain, newest first.
    pub async fn history(
        &self,
        project_id: Uuid,
        canonical_id: Uuid,
    ) -> Result<Vec<GraphRelationship>> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND canonical_id = $2 ORDER BY version DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(canonical_id)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        if rows.is_empty() {
            return Err(Error::not_found(format!("relationship {canonical_id}")));
        }
        rows.iter().map(relationship_from_row).collect()
    }

    /// Project-scoped listing of active relationships.
    pub async fn list(
        &self,
        project_id: Uuid,
        args: ListRelationships,
    ) -> Result<Vec<GraphRelationship>> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND deleted_at IS NULL \
               AND ($2::text IS NULL OR type = $2) \
               AND ($3::uuid IS NULL OR src_id = $3) \
               AND ($4::uuid IS NULL OR dst_id = $4) \
             ORDER BY updated_at DESC, id LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(args.rel_type)
            .bind(args.src_id)
            .bind(args.dst_id)
            .bind(args.limit)
            .bind(args.offset)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(relationship_from_row).collect()
    }

    /// Re-embed active relationships whose embedding is NULL from their
    /// stored triplet text.
    pub async fn backfill_embeddings(
        &self,
        project_id: Uuid,
        batch_size: usize,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let sql = "SELECT id, triplet_text FROM graph_relationships \
                   WHERE project_id = $1 AND deleted_at IS NULL \
                     AND embedding IS NULL AND triplet_text IS NOT NULL \
                   ORDER BY id";

        let mut total = 0u64;
        let mut pending: Vec<(Uuid, String)> = Vec::new();
        {
            let mut stream = sqlx::query(sql).bind(project_id).fetch(self.storage.pool());
            while let Some(row) = stream.try_next().await.map_err(map_sqlx_err)? {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                let text: String = row
                    .try_get("triplet_text")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                pending.push((id, text));
                if pending.len() >= batch_size {
                    total += self.flush_backfill(&pending, deadline).await?;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            total += self.flush_backfill(&pending, deadline).await?;
        }

        debug!(%project_id, embedded = total, "relationship embedding backfill complete");
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
        let now = Utc::now();
        for ((id, _), vector) in pending.iter().zip(vectors) {
            let result = sqlx::query(
                "UPDATE graph_relationships \
                 SET embedding = $2, embedding_updated_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(Vector::from(vector))
            .bind(now)
            .execute(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    async fn find_active(
        &self,
        project_id: Uuid,
        rel_type: &str,
        src_id: Uuid,
        dst_id: Uuid,
    ) -> Result<Option<GraphRelationship>> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS} FROM graph_relationships \
             WHERE project_id = $1 AND type = $2 AND src_id = $3 AND dst_id = $4 \
               AND deleted_at IS NULL \
             ORDER BY version DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(project_id)
            .bind(rel_type)
            .bind(src_id)
            .bind(dst_id)
            .fetch_optional(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?
            .map(|row| relationship_from_row(&row))
            .transpose()
    }

    /// Replace an existing active edge with a new version carrying the new
    /// properties (create-on-existing with a differing payload).
    async fn supersede_with(
        &self,
        project_id: Uuid,
        existing: GraphRelationship,
        args: CreateRelationship,
        src: &lattice_core::types::GraphObject,
        dst: &lattice_core::types::GraphObject,
        deadline: Option<Instant>,
    ) -> Result<GraphRelationship> {
        let now = Utc::now();
        let triplet = triplet_text(src, &args.rel_type, dst);
        let mut next = GraphRelationship {
            id: Uuid::new_v4(),
            canonical_id: existing.canonical_id,
            project_id,
            src_id: existing.src_id,
            dst_id: existing.dst_id,
            rel_type: existing.rel_type.clone(),
            version: existing.version + 1,
            properties: args.properties,
            weight: args.weight.or(existing.weight),
            embedding: None,
            embedding_updated_at: None,
            triplet_text: Some(triplet),
            created_at: existing.created_at,
            updated_at: now,
            deleted_at: None,
        };

        let mut tx = self.storage.pool().begin().await.map_err(map_sqlx_err)?;
        self.supersede(&mut tx, existing.id).await?;
        self.insert_version(&mut *tx, &next).await?;
        self.embed_in_unit(&mut tx, &mut next, deadline).await;
        tx.commit().await.map_err(map_sqlx_err)?;

        debug!(canonical_id = %next.canonical_id, version = next.version,
               "superseded relationship with new properties");
        Ok(next)
    }

    /// Embed the triplet text and stamp the row inside the open write unit.
    /// Failure is logged and swallowed so the relationship commits with a
    /// NULL embedding.
    async fn embed_in_unit(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        relationship: &mut GraphRelationship,
        deadline: Option<Instant>,
    ) {
        let Some(triplet) = relationship.triplet_text.clone() else {
            return;
        };
        match self.embedder.embed(&triplet, deadline).await {
            Ok(vector) => {
                let now = Utc::now();
                let update = sqlx::query(
                    "UPDATE graph_relationships \
                     SET embedding = $2, embedding_updated_at = $3 WHERE id = $1",
                )
                .bind(relationship.id)
                .bind(Vector::from(vector.clone()))
                .bind(now)
                .execute(&mut **tx)
                .await;
                match update {
                    Ok(_) => {
                        relationship.embedding = Some(vector);
                        relationship.embedding_updated_at = Some(now);
                    }
                    Err(error) => {
                        warn!(%error, "failed to store triplet embedding, committing without it");
                    }
                }
            }
            Err(error) => {
                warn!(%error, triplet = %triplet, "triplet embedding failed, committing without it");
            }
        }
    }

    async fn supersede(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        row_id: Uuid,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE graph_relationships SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(row_id)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() != 1 {
            return Err(Error::conflict(format!(
                "relationship row {row_id} was superseded concurrently"
            )));
        }
        Ok(())
    }

    async fn insert_version<'e, E>(&self, executor: E, rel: &GraphRelationship) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            "INSERT INTO graph_relationships \
             (id, canonical_id, project_id, src_id, dst_id, type, version, properties, weight, \
              embedding, embedding_updated_at, triplet_text, created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(rel.id)
        .bind(rel.canonical_id)
        .bind(rel.project_id)
        .bind(rel.src_id)
        .bind(rel.dst_id)
        .bind(&rel.rel_type)
        .bind(rel.version)
        .bind(serde_json::Value::Object(rel.properties.clone()))
        .bind(rel.weight)
        .bind(rel.embedding.clone().map(Vector::from))
        .bind(rel.embedding_updated_at)
        .bind(&rel.triplet_text)
        .bind(rel.created_at)
        .bind(rel.updated_at)
        .bind(rel.deleted_at)
        .execute(executor)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl TripletSearch for RelationshipStore {
    async fn search_triplets(
        &self,
        project_id: Uuid,
        vector: &[f32],
        relationship_types: &[String],
        limit: usize,
    ) -> Result<Vec<ScoredRelationship>> {
        let sql = format!(
            "SELECT {RELATIONSHIP_COLUMNS}, 1 - (embedding <=> $2) AS score \
             FROM graph_relationships \
             WHERE project_id = $1 AND deleted_at IS NULL AND embedding IS NOT NULL \
               AND (cardinality($3::text[]) = 0 OR type = ANY($3)) \
             ORDER BY embedding <=> $2, updated_at DESC, id LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(Vector::from(vector.to_vec()))
            .bind(relationship_types)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row
                    .try_get("score")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Ok(ScoredRelationship {
                    relationship: relationship_from_row(row)?,
                    score,
                })
            })
            .collect()
    }
}
