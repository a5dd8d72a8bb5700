//! Row-to-domain decoding shared by the stores.

use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;

use lattice_core::error::{Error, Result};
use lattice_core::types::{ArchiveEntry, Document, DocumentChunk, GraphObject, GraphRelationship, Properties};

/// Domain columns of `graph_objects` (the generated `fts_vector` is never
/// read back).
pub(crate) const OBJECT_COLUMNS: &str = "id, canonical_id, project_id, type, version, key, \
     properties, status, labels, actor_id, embedding, schema_version, migration_archive, \
     created_at, updated_at, deleted_at, last_accessed_at";

pub(crate) const RELATIONSHIP_COLUMNS: &str = "id, canonical_id, project_id, src_id, dst_id, \
     type, version, properties, weight, embedding, embedding_updated_at, triplet_text, \
     created_at, updated_at, deleted_at";

pub(crate) const CHUNK_COLUMNS: &str =
    "document_chunks.id, document_chunks.document_id, document_chunks.chunk_index, \
     document_chunks.text, document_chunks.embedding";

pub(crate) fn get<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(name)
        .map_err(|e| Error::Storage(format!("failed to decode column '{name}': {e}")))
}

fn properties_from(value: serde_json::Value) -> Properties {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Properties::new(),
    }
}

pub(crate) fn object_from_row(row: &PgRow) -> Result<GraphObject> {
    let properties: serde_json::Value = get(row, "properties")?;
    let archive: serde_json::Value = get(row, "migration_archive")?;
    let migration_archive: Vec<ArchiveEntry> = serde_json::from_value(archive)
        .map_err(|e| Error::Storage(format!("corrupt migration archive: {e}")))?;
    let embedding: Option<Vector> = get(row, "embedding")?;

    Ok(GraphObject {
        id: get(row, "id")?,
        canonical_id: get(row, "canonical_id")?,
        project_id: get(row, "project_id")?,
        object_type: get(row, "type")?,
        version: get(row, "version")?,
        key: get(row, "key")?,
        properties: properties_from(properties),
        status: get(row, "status")?,
        labels: get(row, "labels")?,
        actor_id: get(row, "actor_id")?,
        embedding: embedding.map(|v| v.to_vec()),
        schema_version: get(row, "schema_version")?,
        migration_archive,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        deleted_at: get(row, "deleted_at")?,
        last_accessed_at: get(row, "last_accessed_at")?,
    })
}

pub(crate) fn relationship_from_row(row: &PgRow) -> Result<GraphRelationship> {
    let properties: serde_json::Value = get(row, "properties")?;
    let embedding: Option<Vector> = get(row, "embedding")?;

    Ok(GraphRelationship {
        id: get(row, "id")?,
        canonical_id: get(row, "canonical_id")?,
        project_id: get(row, "project_id")?,
        src_id: get(row, "src_id")?,
        dst_id: get(row, "dst_id")?,
        rel_type: get(row, "type")?,
        version: get(row, "version")?,
        properties: properties_from(properties),
        weight: get(row, "weight")?,
        embedding: embedding.map(|v| v.to_vec()),
        embedding_updated_at: get(row, "embedding_updated_at")?,
        triplet_text: get(row, "triplet_text")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        deleted_at: get(row, "deleted_at")?,
    })
}

pub(crate) fn chunk_from_row(row: &PgRow) -> Result<DocumentChunk> {
    let embedding: Option<Vector> = get(row, "embedding")?;
    let embedding = embedding.map(|v| v.to_vec());

    Ok(DocumentChunk {
        id: get(row, "id")?,
        document_id: get(row, "document_id")?,
        chunk_index: get(row, "chunk_index")?,
        text: get(row, "text")?,
        has_embedding: embedding.is_some(),
        embedding,
    })
}

pub(crate) fn document_from_row(row: &PgRow) -> Result<Document> {
    Ok(Document {
        id: get(row, "id")?,
        project_id: get(row, "project_id")?,
        filename: get(row, "filename")?,
        content_hash: get(row, "content_hash")?,
        size: get(row, "size")?,
        mime_type: get(row, "mime_type")?,
        source_type: get(row, "source_type")?,
        parent_id: get(row, "parent_id")?,
        created_at: get(row, "created_at")?,
    })
}
