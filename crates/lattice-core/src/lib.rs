//! Core domain model for the Lattice knowledge engine.
//!
//! This crate is the foundation of the workspace: every other crate depends
//! on it and it depends on no other Lattice crate. It defines:
//!
//! - The versioned graph entities ([`types::GraphObject`],
//!   [`types::GraphRelationship`]) and their lifecycle helpers
//! - The canonical error set ([`error::Error`]) carried across components
//! - The schema registry ([`schema`]) and property validation ([`validate`])
//! - The unified search request/response model ([`search`])
//! - The trait seams ([`traits`]) that storage and embedding backends
//!   implement: core defines the abstractions, backends provide them, and
//!   higher-level crates inject the implementation.

pub mod error;
pub mod schema;
pub mod search;
pub mod traits;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
pub use types::{
    ArchiveEntry, Document, DocumentChunk, GraphObject, GraphRelationship, MigrationCounts,
    Properties, RiskLevel, RunStatus, SchemaMigrationRun,
};
