//! Hybrid search for the Lattice engine.
//!
//! Three retrieval streams run in parallel: graph objects (FTS + vector),
//! relationship triplets (vector only), and document chunks (FTS + vector).
//! Their results fuse under a pluggable strategy. The orchestrator talks only to the
//! trait seams in `lattice-core`, so any backend (or test mock) plugs in.

pub mod fusion;
mod orchestrator;
mod tracker;

pub use fusion::{FusionConfig, Modalities, StreamHit, StreamKind};
pub use orchestrator::SearchOrchestrator;
pub use tracker::AccessTracker;
