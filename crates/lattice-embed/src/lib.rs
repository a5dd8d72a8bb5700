//! Embedding client for the Lattice engine.
//!
//! Maps text to 768-dimension vectors via an external provider. Two modes,
//! selected by configuration: the Generative Language API (API-key auth)
//! and Vertex AI prediction (bearer-token auth). Transient upstream
//! failures are retried with exponential backoff; terminal failures surface
//! as `EmbeddingUnavailable` so create paths can soft-fail and query paths
//! can degrade.

mod client;
#[cfg(any(test, feature = "test-utils"))]
mod mock;

pub use client::HttpEmbeddingClient;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockEmbedder;
