//! Deterministic offline embedder for tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use async_trait::async_trait;

use lattice_core::error::{Error, Result};
use lattice_core::search::EMBEDDING_DIMENSION;
use lattice_core::traits::EmbeddingProvider;

/// Hashes text into a unit-length vector so similarity is stable across
/// runs: identical texts embed identically, different texts almost never do.
pub struct MockEmbedder {
    dimension: usize,
    failing: bool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        MockEmbedder {
            dimension: EMBEDDING_DIMENSION,
            failing: false,
        }
    }

    /// An embedder whose every call fails with `EmbeddingUnavailable`, for
    /// exercising soft-fail paths.
    pub fn failing() -> Self {
        MockEmbedder {
            dimension: EMBEDDING_DIMENSION,
            failing: true,
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // xorshift64 keeps the sequence cheap and reproducible
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state as f64 / u64::MAX as f64) * 2.0 - 1.0) as f32);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        vector.iter().map(|v| v / norm).collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str, _deadline: Option<Instant>) -> Result<Vec<f32>> {
        if self.failing {
            return Err(Error::EmbeddingUnavailable("mock provider down".to_string()));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _deadline: Option<Instant>,
    ) -> Result<Vec<Vec<f32>>> {
        if self.failing {
            return Err(Error::EmbeddingUnavailable("mock provider down".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_and_unit_length() {
        let embedder = MockEmbedder::new();
        let a = embedder.embed("hello", None).await.unwrap();
        let b = embedder.embed("hello", None).await.unwrap();
        let c = embedder.embed("world", None).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), EMBEDDING_DIMENSION);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn failing_mode_reports_unavailable() {
        let embedder = MockEmbedder::failing();
        let err = embedder.embed("hello", None).await.unwrap_err();
        assert_eq!(err.code(), "embedding_unavailable");
    }
}
