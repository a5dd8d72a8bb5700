//! PostgreSQL storage backend for the Lattice engine.
//!
//! One crate owns every persistence concern: the connection facade and
//! bootstrap DDL, the versioned object and relationship stores, the chunk
//! and document stores, and the migration run audit table. The stores
//! implement the trait seams declared in `lattice-core`, so everything
//! above this crate stays database-agnostic.
//!
//! Integration tests require a live Postgres with the pgvector extension;
//! they read `LATTICE_TEST_DSN` and are ignored when it is unset.

mod chunk_store;
mod client;
mod migration_runs;
mod object_store;
mod relationship_store;
mod row;

pub use chunk_store::{ChunkStore, DocumentStore, ListChunks};
pub use client::Storage;
pub use migration_runs::MigrationRunStore;
pub use object_store::{CreateObject, ListObjects, ObjectEdges, ObjectStore, PatchObject};
pub use relationship_store::{
    CreateRelationship, ListRelationships, PatchRelationship, RelationshipStore,
};
