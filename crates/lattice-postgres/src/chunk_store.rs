//! Document chunk store.
//!
//! Chunks belong to documents; project scoping always goes through the
//! owning document. FTS uses the generated tsvector column, vector search
//! the nullable embedding column; a chunk without an embedding is simply
//! never a vector candidate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use lattice_core::error::{Error, Result};
use lattice_core::traits::{ChunkSearch, ScoredChunk};
use lattice_core::types::{Document, DocumentChunk};

use crate::client::{map_sqlx_err, Storage};
use crate::row::{chunk_from_row, document_from_row, CHUNK_COLUMNS};

/// Filters for chunk listings.
#[derive(Debug, Clone)]
pub struct ListChunks {
    pub document_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListChunks {
    fn default() -> Self {
        ListChunks {
            document_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Clone)]
pub struct ChunkStore {
    storage: Storage,
}

impl ChunkStore {
    pub fn new(storage: Storage) -> Self {
        ChunkStore { storage }
    }

    /// Insert a chunk for an existing document. Used by the ingestion side
    /// and by tests; the extraction pipeline itself is external.
    pub async fn insert(
        &self,
        document_id: Uuid,
        chunk_index: i32,
        text: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<DocumentChunk> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO document_chunks (id, document_id, chunk_index, text, embedding) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(document_id)
        .bind(chunk_index)
        .bind(text)
        .bind(embedding.clone().map(Vector::from))
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        Ok(DocumentChunk {
            id,
            document_id,
            chunk_index,
            text: text.to_string(),
            has_embedding: embedding.is_some(),
            embedding,
        })
    }

    /// Project-scoped listing, ordered by (document, chunk index).
    pub async fn list(&self, project_id: Uuid, args: ListChunks) -> Result<Vec<DocumentChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM document_chunks \
             JOIN documents ON documents.id = document_chunks.document_id \
             WHERE documents.project_id = $1 \
               AND ($2::uuid IS NULL OR document_chunks.document_id = $2) \
             ORDER BY document_chunks.document_id, document_chunks.chunk_index \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(args.document_id)
            .bind(args.limit)
            .bind(args.offset)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(chunk_from_row).collect()
    }

    pub async fn delete(&self, project_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM document_chunks USING documents \
             WHERE documents.id = document_chunks.document_id \
               AND documents.project_id = $1 AND document_chunks.id = $2",
        )
        .bind(project_id)
        .bind(id)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("chunk {id}")));
        }
        Ok(())
    }

    /// Delete a list of chunks; returns how many existed.
    pub async fn bulk_delete(&self, project_id: Uuid, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM document_chunks USING documents \
             WHERE documents.id = document_chunks.document_id \
               AND documents.project_id = $1 AND document_chunks.id = ANY($2)",
        )
        .bind(project_id)
        .bind(ids)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    /// Delete every chunk of one document; returns the count.
    pub async fn delete_by_document(&self, project_id: Uuid, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM document_chunks USING documents \
             WHERE documents.id = document_chunks.document_id \
               AND documents.project_id = $1 AND document_chunks.document_id = $2",
        )
        .bind(project_id)
        .bind(document_id)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        debug!(%document_id, deleted = result.rows_affected(), "deleted chunks by document");
        Ok(result.rows_affected())
    }

    /// Delete chunks for a batch of documents; returns per-document counts.
    /// Documents with no chunks report zero.
    pub async fn bulk_delete_by_documents(
        &self,
        project_id: Uuid,
        document_ids: &[Uuid],
    ) -> Result<BTreeMap<Uuid, u64>> {
        let mut counts: BTreeMap<Uuid, u64> =
            document_ids.iter().map(|id| (*id, 0)).collect();
        if document_ids.is_empty() {
            return Ok(counts);
        }

        let rows = sqlx::query(
            "DELETE FROM document_chunks USING documents \
             WHERE documents.id = document_chunks.document_id \
               AND documents.project_id = $1 AND document_chunks.document_id = ANY($2) \
             RETURNING document_chunks.document_id",
        )
        .bind(project_id)
        .bind(document_ids)
        .fetch_all(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;

        for row in rows {
            let document_id: Uuid = row
                .try_get("document_id")
                .map_err(|e| Error::Storage(e.to_string()))?;
            *counts.entry(document_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl ChunkSearch for ChunkStore {
    async fn search_chunks_fts(
        &self,
        project_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, \
                    ts_rank(document_chunks.fts_vector, \
                            websearch_to_tsquery('english', $2))::float8 AS score \
             FROM document_chunks \
             JOIN documents ON documents.id = document_chunks.document_id \
             WHERE documents.project_id = $1 \
               AND document_chunks.fts_vector @@ websearch_to_tsquery('english', $2) \
             ORDER BY score DESC, document_chunks.id LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(query)
            .bind(limit as i64)
            .fetch_all(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;

        rows.iter()
            .map(|row| {
                let score: f64 = row
                    .try_get("score")
                    .map_err(|e| Error::Storage(e.to_string()))?;
                Ok(ScoredChunk {
                    chunk: chunk_from_row(row)?,
                    score,
                })
            })
            .collect()
    }

    async fn search_chunks_vector(
        &self,
        project_id: Uuid,
        vector: &[f32],
        limit: usize,
        max_distance: Option<f64>,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, 1 - (document_chunks.embedding <=> $2) AS score \
             FROM document_chunks \
             JOIN documents ON documents.id = document_chunks.document_id \
             WHERE documents.project_id = $1 AND document_chunks.embedding IS NOT NULL \
               AND ($3::float8 IS NULL OR (document_chunks.embedding <=> $2) <= $3) \
             ORDER BY document_chunks.embedding <=> $2, document_chunks.id LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(Vector::from(vector.to_vec()))
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
                Ok(ScoredChunk {
                    chunk: chunk_from_row(row)?,
                    score,
                })
            })
            .collect()
    }
}

/// Minimal document metadata store: enough for chunk scoping, dedup lookups,
/// and cascade deletes. Ingestion itself lives outside the engine.
#[derive(Clone)]
pub struct DocumentStore {
    storage: Storage,
}

impl DocumentStore {
    pub fn new(storage: Storage) -> Self {
        DocumentStore { storage }
    }

    pub async fn insert(&self, document: &Document) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents \
             (id, project_id, filename, content_hash, size, mime_type, source_type, parent_id, \
              created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(document.id)
        .bind(document.project_id)
        .bind(&document.filename)
        .bind(&document.content_hash)
        .bind(document.size)
        .bind(&document.mime_type)
        .bind(&document.source_type)
        .bind(document.parent_id)
        .bind(document.created_at)
        .execute(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn get(&self, project_id: Uuid, id: Uuid) -> Result<Document> {
        let row = sqlx::query(
            "SELECT id, project_id, filename, content_hash, size, mime_type, source_type, \
                    parent_id, created_at \
             FROM documents WHERE project_id = $1 AND id = $2",
        )
        .bind(project_id)
        .bind(id)
        .fetch_optional(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::not_found(format!("document {id}")))?;
        document_from_row(&row)
    }

    pub async fn list(&self, project_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, project_id, filename, content_hash, size, mime_type, source_type, \
                    parent_id, created_at \
             FROM documents WHERE project_id = $1 \
             ORDER BY created_at DESC, id LIMIT $2 OFFSET $3",
        )
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.storage.pool())
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(document_from_row).collect()
    }

    /// Delete a document; its chunks cascade.
    pub async fn delete(&self, project_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE project_id = $1 AND id = $2")
            .bind(project_id)
            .bind(id)
            .execute(self.storage.pool())
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("document {id}")));
        }
        Ok(())
    }
}
