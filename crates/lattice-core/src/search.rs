//! Unified search request and response model.
//!
//! The orchestrator in `lattice-search` executes these requests; the tool
//! surface serializes them straight to agents, so the wire names here are
//! the public contract (camelCase envelope, lowercase discriminants).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Properties;

/// Embedding width shared by every vector column in the engine.
pub const EMBEDDING_DIMENSION: usize = 768;

/// Which corpora a search request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultTypes {
    /// Graph objects, relationships, and text chunks
    #[default]
    Both,
    /// Graph objects and relationships only
    Graph,
    /// Text chunks only
    Text,
}

impl ResultTypes {
    pub fn includes_graph(self) -> bool {
        matches!(self, ResultTypes::Both | ResultTypes::Graph)
    }

    pub fn includes_text(self) -> bool {
        matches!(self, ResultTypes::Both | ResultTypes::Text)
    }
}

/// Rule for combining the per-stream rankings into one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    #[default]
    Weighted,
    Rrf,
    Interleave,
    GraphFirst,
    TextFirst,
}

impl std::fmt::Display for FusionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FusionStrategy::Weighted => "weighted",
            FusionStrategy::Rrf => "rrf",
            FusionStrategy::Interleave => "interleave",
            FusionStrategy::GraphFirst => "graph_first",
            FusionStrategy::TextFirst => "text_first",
        };
        f.write_str(s)
    }
}

/// Stream weights for the weighted strategy; renormalized before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionWeights {
    pub graph_weight: f64,
    pub text_weight: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        FusionWeights {
            graph_weight: 0.6,
            text_weight: 0.4,
        }
    }
}

impl FusionWeights {
    /// Scale the pair so it sums to 1. A degenerate all-zero pair falls back
    /// to the defaults.
    pub fn normalized(self) -> Self {
        let sum = self.graph_weight + self.text_weight;
        if sum <= 0.0 {
            return FusionWeights::default();
        }
        FusionWeights {
            graph_weight: self.graph_weight / sum,
            text_weight: self.text_weight / sum,
        }
    }
}

/// A unified search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchRequest {
    pub project_id: Uuid,
    /// Lexical query; required unless `vector` is present
    pub query: Option<String>,
    /// Pre-computed query embedding; enables vector probes without FTS
    pub vector: Option<Vec<f32>>,
    pub result_types: ResultTypes,
    /// Filters the graph-object stream only
    pub graph_types: Vec<String>,
    /// Filters the relationship stream only
    pub relationship_types: Vec<String>,
    pub labels: Vec<String>,
    pub limit: usize,
    pub fusion_strategy: FusionStrategy,
    pub weights: FusionWeights,
    pub include_debug: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            project_id: Uuid::nil(),
            query: None,
            vector: None,
            result_types: ResultTypes::default(),
            graph_types: Vec::new(),
            relationship_types: Vec::new(),
            labels: Vec::new(),
            limit: 20,
            fusion_strategy: FusionStrategy::default(),
            weights: FusionWeights::default(),
            include_debug: false,
        }
    }
}

impl SearchRequest {
    /// Argument validation shared by every entry point. `max_query_len` comes
    /// from search configuration (default 800).
    pub fn validate(&self, max_query_len: usize) -> Result<()> {
        match (&self.query, &self.vector) {
            (None, None) => {
                return Err(Error::bad_request("either query or vector is required"));
            }
            (Some(q), _) => {
                if q.is_empty() {
                    return Err(Error::bad_request("query must not be empty"));
                }
                if q.chars().count() > max_query_len {
                    return Err(Error::bad_request(format!(
                        "query exceeds maximum length of {max_query_len} characters"
                    )));
                }
            }
            (None, Some(_)) => {}
        }

        if let Some(vector) = &self.vector {
            if vector.len() != EMBEDDING_DIMENSION {
                return Err(Error::bad_request(format!(
                    "vector must have dimension {EMBEDDING_DIMENSION}, got {}",
                    vector.len()
                )));
            }
        }

        if self.limit < 1 || self.limit > 100 {
            return Err(Error::bad_request("limit must be between 1 and 100"));
        }

        if self.weights.graph_weight < 0.0 || self.weights.text_weight < 0.0 {
            return Err(Error::bad_request("fusion weights must be non-negative"));
        }

        Ok(())
    }
}

/// One fused result item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchItem {
    #[serde(rename_all = "camelCase")]
    Graph {
        id: Uuid,
        object_type: String,
        key: Option<String>,
        score: f64,
        fields: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Relationship {
        id: Uuid,
        score: f64,
        relationship_type: String,
        triplet_text: Option<String>,
        source_id: Uuid,
        target_id: Uuid,
        properties: Properties,
    },
    #[serde(rename_all = "camelCase")]
    Text { id: Uuid, score: f64, snippet: String },
}

impl SearchItem {
    pub fn id(&self) -> Uuid {
        match self {
            SearchItem::Graph { id, .. }
            | SearchItem::Relationship { id, .. }
            | SearchItem::Text { id, .. } => *id,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            SearchItem::Graph { score, .. }
            | SearchItem::Relationship { score, .. }
            | SearchItem::Text { score, .. } => *score,
        }
    }

    pub fn set_score(&mut self, fused: f64) {
        match self {
            SearchItem::Graph { score, .. }
            | SearchItem::Relationship { score, .. }
            | SearchItem::Text { score, .. } => *score = fused,
        }
    }

    /// Tie-break priority: graph > relationship > text.
    pub fn type_priority(&self) -> u8 {
        match self {
            SearchItem::Graph { .. } => 0,
            SearchItem::Relationship { .. } => 1,
            SearchItem::Text { .. } => 2,
        }
    }
}

/// Wall-clock accounting for one request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTime {
    pub graph_search_ms: u64,
    pub relationship_search_ms: u64,
    pub text_search_ms: u64,
    pub fusion_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub total_results: usize,
    pub graph_result_count: usize,
    pub relationship_result_count: usize,
    pub text_result_count: usize,
    pub fusion_strategy: FusionStrategy,
    pub execution_time: ExecutionTime,
}

/// Score distribution for one stream, pre-fusion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl ScoreDistribution {
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return ScoreDistribution::default();
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        ScoreDistribution { min, max, mean }
    }
}

/// Per-stream diagnostics, returned only when the request asked for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDebug {
    pub pre_fusion_count: usize,
    pub score_distribution: ScoreDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDebug {
    pub objects: StreamDebug,
    pub relationships: StreamDebug,
    pub chunks: StreamDebug,
    /// Set when a deadline or stream failure made the response partial
    pub partial: bool,
}

/// The unified search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchItem>,
    pub metadata: SearchMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<SearchDebug>,
}

/// Extra knob for `search_vector`-style probes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorProbeOptions {
    /// Drop candidates whose cosine distance exceeds this bound
    pub max_distance: Option<f64>,
}
