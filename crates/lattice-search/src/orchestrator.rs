//! Three-way parallel hybrid search.
//!
//! Stage A fans out over graph objects (FTS + vector), relationship
//! triplets (vector only; the asymmetry is real), and document chunks
//! (FTS + vector), each worker under its own deadline. Stage B fuses the
//! normalized streams. Stage C schedules access-timestamp stamping without
//! touching the response path. A failed stream degrades the response
//! instead of failing it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use lattice_config::SearchConfig;
use lattice_core::error::Result;
use lattice_core::search::{
    ExecutionTime, ScoreDistribution, SearchDebug, SearchItem, SearchMetadata, SearchRequest,
    SearchResponse, StreamDebug,
};
use lattice_core::traits::{
    ChunkSearch, EmbeddingProvider, ObjectFilters, ObjectSearch, TripletSearch,
};

use crate::fusion::{self, FusionConfig, Modalities, StreamHit, StreamKind};
use crate::tracker::AccessTracker;

/// Upper bound for one retrieval worker when the caller sets no deadline.
const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Snippet length for text results, in characters.
const SNIPPET_CHARS: usize = 240;

/// The unified search entry point over the three retrieval streams.
pub struct SearchOrchestrator {
    objects: Arc<dyn ObjectSearch>,
    triplets: Arc<dyn TripletSearch>,
    chunks: Arc<dyn ChunkSearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    tracker: Option<AccessTracker>,
    config: SearchConfig,
}

/// What one worker produced: its hits, wall time, and error if it failed.
struct StreamOutcome {
    hits: Vec<StreamHit>,
    elapsed_ms: u64,
    error: Option<String>,
}

impl StreamOutcome {
    fn skipped() -> Self {
        StreamOutcome {
            hits: Vec::new(),
            elapsed_ms: 0,
            error: None,
        }
    }

    fn debug(&self) -> StreamDebug {
        let scores: Vec<f64> = self.hits.iter().map(|h| h.stream_score).collect();
        StreamDebug {
            pre_fusion_count: self.hits.len(),
            score_distribution: ScoreDistribution::from_scores(&scores),
            error: self.error.clone(),
        }
    }
}

impl SearchOrchestrator {
    pub fn new(
        objects: Arc<dyn ObjectSearch>,
        triplets: Arc<dyn TripletSearch>,
        chunks: Arc<dyn ChunkSearch>,
        embedder: Arc<dyn EmbeddingProvider>,
        tracker: Option<AccessTracker>,
        config: SearchConfig,
    ) -> Self {
        SearchOrchestrator {
            objects,
            triplets,
            chunks,
            embedder,
            tracker,
            config,
        }
    }

    /// Execute a unified search. The optional deadline bounds the whole
    /// request including query embedding and every retrieval worker.
    pub async fn unified_search(
        &self,
        request: SearchRequest,
        deadline: Option<Instant>,
    ) -> Result<SearchResponse> {
        let total_start = Instant::now();
        request.validate(self.config.max_query_len)?;

        let worker_deadline = deadline.unwrap_or(total_start + DEFAULT_WORKER_TIMEOUT);

        // Resolve the query vector up front; a dead provider degrades the
        // vector probes instead of failing the request.
        let mut embed_error: Option<String> = None;
        let query_vector: Option<Vec<f32>> = match (&request.vector, &request.query) {
            (Some(vector), _) => Some(vector.clone()),
            (None, Some(query)) => match self.embedder.embed(query, Some(worker_deadline)).await {
                Ok(vector) => Some(vector),
                Err(error) => {
                    warn!(%error, "query embedding failed, degrading to lexical-only search");
                    embed_error = Some(error.to_string());
                    None
                }
            },
            (None, None) => None,
        };

        let run_graph = request.result_types.includes_graph();
        let run_text = request.result_types.includes_text();

        let object_work = self.run_stream(run_graph, worker_deadline, {
            let request = request.clone();
            let vector = query_vector.clone();
            async move { self.object_stream(&request, vector.as_deref()).await }
        });
        let relationship_work = self.run_stream(run_graph, worker_deadline, {
            let request = request.clone();
            let vector = query_vector.clone();
            async move { self.relationship_stream(&request, vector.as_deref()).await }
        });
        let chunk_work = self.run_stream(run_text, worker_deadline, {
            let request = request.clone();
            let vector = query_vector.clone();
            async move { self.chunk_stream(&request, vector.as_deref()).await }
        });

        let (object_outcome, mut relationship_outcome, chunk_outcome) =
            tokio::join!(object_work, relationship_work, chunk_work);

        // Surface embedding degradation on the stream it silenced: the
        // relationship stream is vector-only and lost everything.
        if let Some(embed_error) = &embed_error {
            if run_graph && relationship_outcome.error.is_none() {
                relationship_outcome.error = Some(embed_error.clone());
            }
        }

        let fusion_start = Instant::now();
        let fusion_config = FusionConfig {
            strategy: request.fusion_strategy,
            weights: request.weights,
            rrf_k: self.config.rrf_k,
            limit: request.limit,
        };
        let results = fusion::fuse(
            object_outcome.hits.clone(),
            relationship_outcome.hits.clone(),
            chunk_outcome.hits.clone(),
            &fusion_config,
        );
        let fusion_ms = fusion_start.elapsed().as_millis() as u64;

        // Stage C: stamp retrieved graph objects off the response path.
        if request.result_types.includes_graph() {
            let object_ids: Vec<Uuid> = results
                .iter()
                .filter_map(|item| match item {
                    SearchItem::Graph { id, .. } => Some(*id),
                    _ => None,
                })
                .collect();
            if !object_ids.is_empty() {
                if let Some(tracker) = &self.tracker {
                    tracker.schedule(request.project_id, object_ids);
                }
            }
        }

        let graph_result_count = results
            .iter()
            .filter(|r| matches!(r, SearchItem::Graph { .. }))
            .count();
        let relationship_result_count = results
            .iter()
            .filter(|r| matches!(r, SearchItem::Relationship { .. }))
            .count();
        let text_result_count = results
            .iter()
            .filter(|r| matches!(r, SearchItem::Text { .. }))
            .count();

        let partial = object_outcome.error.is_some()
            || relationship_outcome.error.is_some()
            || chunk_outcome.error.is_some();
        let debug = request.include_debug.then(|| SearchDebug {
            objects: object_outcome.debug(),
            relationships: relationship_outcome.debug(),
            chunks: chunk_outcome.debug(),
            partial,
        });

        let response = SearchResponse {
            metadata: SearchMetadata {
                total_results: results.len(),
                graph_result_count,
                relationship_result_count,
                text_result_count,
                fusion_strategy: request.fusion_strategy,
                execution_time: ExecutionTime {
                    graph_search_ms: object_outcome.elapsed_ms,
                    relationship_search_ms: relationship_outcome.elapsed_ms,
                    text_search_ms: chunk_outcome.elapsed_ms,
                    fusion_ms,
                    total_ms: total_start.elapsed().as_millis() as u64,
                },
            },
            results,
            debug,
        };

        debug!(
            total = response.metadata.total_results,
            strategy = %response.metadata.fusion_strategy,
            partial,
            "unified search complete"
        );
        Ok(response)
    }

    /// Run one retrieval worker under the shared deadline, converting
    /// failures and timeouts into an empty, error-annotated outcome.
    async fn run_stream<F>(&self, enabled: bool, deadline: Instant, work: F) -> StreamOutcome
    where
        F: std::future::Future<Output = Result<Vec<StreamHit>>>,
    {
        if !enabled {
            return StreamOutcome::skipped();
        }
        let started = Instant::now();
        let budget = deadline.saturating_duration_since(started);
        let outcome = match tokio::time::timeout(budget, work).await {
            Ok(Ok(hits)) => StreamOutcome {
                hits,
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Ok(Err(error)) => {
                warn!(%error, "retrieval stream failed, continuing with the others");
                StreamOutcome {
                    hits: Vec::new(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    error: Some(error.to_string()),
                }
            }
            Err(_) => StreamOutcome {
                hits: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: Some("stream deadline exceeded".to_string()),
            },
        };
        outcome
    }

    /// Graph objects: union of the FTS and vector probes, merged per object
    /// with the best score across modalities.
    async fn object_stream(
        &self,
        request: &SearchRequest,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<StreamHit>> {
        let filters = ObjectFilters {
            object_types: request.graph_types.clone(),
            labels: request.labels.clone(),
        };

        let lexical = match &request.query {
            Some(query) => {
                self.objects
                    .search_objects_fts(request.project_id, query, &filters, request.limit)
                    .await?
            }
            None => Vec::new(),
        };
        let vector = match query_vector {
            Some(v) => {
                self.objects
                    .search_objects_vector(request.project_id, v, &filters, request.limit, None)
                    .await?
            }
            None => Vec::new(),
        };

        // Lexical ts_rank is unbounded; bring it onto [0, 1] by the stream
        // maximum before merging with cosine similarities.
        let mut lexical_scores: Vec<f64> = lexical.iter().map(|h| h.score).collect();
        fusion::max_normalize(&mut lexical_scores);

        struct Merged {
            item: SearchItem,
            score: f64,
            modalities: Modalities,
            updated_at: chrono::DateTime<chrono::Utc>,
        }
        let mut merged: HashMap<Uuid, Merged> = HashMap::new();

        for (hit, score) in lexical.into_iter().zip(lexical_scores) {
            let object = hit.object;
            merged.insert(
                object.id,
                Merged {
                    updated_at: object.updated_at,
                    item: SearchItem::Graph {
                        id: object.id,
                        object_type: object.object_type,
                        key: object.key,
                        score,
                        fields: object.properties,
                    },
                    score,
                    modalities: Modalities {
                        lexical: true,
                        vector: false,
                    },
                },
            );
        }
        for hit in vector {
            let object = hit.object;
            match merged.entry(object.id) {
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    existing.modalities.vector = true;
                    if hit.score > existing.score {
                        existing.score = hit.score;
                        existing.item.set_score(hit.score);
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Merged {
                        updated_at: object.updated_at,
                        item: SearchItem::Graph {
                            id: object.id,
                            object_type: object.object_type,
                            key: object.key,
                            score: hit.score,
                            fields: object.properties,
                        },
                        score: hit.score,
                        modalities: Modalities {
                            lexical: false,
                            vector: true,
                        },
                    });
                }
            }
        }

        let mut entries: Vec<Merged> = merged.into_values().collect();
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.item.id().cmp(&b.item.id()))
        });

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| StreamHit {
                stream: StreamKind::Objects,
                stream_score: entry.score,
                rank,
                modalities: entry.modalities,
                updated_at: Some(entry.updated_at),
                item: entry.item,
            })
            .collect())
    }

    /// Relationships carry no FTS column; without a query vector this
    /// stream is empty by construction.
    async fn relationship_stream(
        &self,
        request: &SearchRequest,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<StreamHit>> {
        let Some(vector) = query_vector else {
            return Ok(Vec::new());
        };

        let hits = self
            .triplets
            .search_triplets(
                request.project_id,
                vector,
                &request.relationship_types,
                request.limit,
            )
            .await?;

        Ok(hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| {
                let rel = hit.relationship;
                StreamHit {
                    stream: StreamKind::Relationships,
                    stream_score: hit.score,
                    rank,
                    modalities: Modalities {
                        lexical: false,
                        vector: true,
                    },
                    updated_at: Some(rel.updated_at),
                    item: SearchItem::Relationship {
                        id: rel.id,
                        score: hit.score,
                        relationship_type: rel.rel_type,
                        triplet_text: rel.triplet_text,
                        source_id: rel.src_id,
                        target_id: rel.dst_id,
                        properties: rel.properties,
                    },
                }
            })
            .collect())
    }

    /// Chunks: union of FTS and vector probes, merged per chunk.
    async fn chunk_stream(
        &self,
        request: &SearchRequest,
        query_vector: Option<&[f32]>,
    ) -> Result<Vec<StreamHit>> {
        let lexical = match &request.query {
            Some(query) => {
                self.chunks
                    .search_chunks_fts(request.project_id, query, request.limit)
                    .await?
            }
            None => Vec::new(),
        };
        let vector = match query_vector {
            Some(v) => {
                self.chunks
                    .search_chunks_vector(request.project_id, v, request.limit, None)
                    .await?
            }
            None => Vec::new(),
        };

        let mut lexical_scores: Vec<f64> = lexical.iter().map(|h| h.score).collect();
        fusion::max_normalize(&mut lexical_scores);

        let mut merged: HashMap<Uuid, (SearchItem, f64, Modalities)> = HashMap::new();
        for (hit, score) in lexical.into_iter().zip(lexical_scores) {
            let chunk = hit.chunk;
            merged.insert(
                chunk.id,
                (
                    SearchItem::Text {
                        id: chunk.id,
                        score,
                        snippet: snippet(&chunk.text),
                    },
                    score,
                    Modalities {
                        lexical: true,
                        vector: false,
                    },
                ),
            );
        }
        for hit in vector {
            let chunk = hit.chunk;
            match merged.entry(chunk.id) {
                Entry::Occupied(mut occupied) => {
                    let (item, score, modalities) = occupied.get_mut();
                    modalities.vector = true;
                    if hit.score > *score {
                        *score = hit.score;
                        item.set_score(hit.score);
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert((
                        SearchItem::Text {
                            id: chunk.id,
                            score: hit.score,
                            snippet: snippet(&chunk.text),
                        },
                        hit.score,
                        Modalities {
                            lexical: false,
                            vector: true,
                        },
                    ));
                }
            }
        }

        let mut entries: Vec<(SearchItem, f64, Modalities)> = merged.into_values().collect();
        entries.sort_by(|(item_a, score_a, _), (item_b, score_b, _)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| item_a.id().cmp(&item_b.id()))
        });

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(rank, (item, score, modalities))| StreamHit {
                stream: StreamKind::Chunks,
                stream_score: score,
                rank,
                modalities,
                updated_at: None,
                item,
            })
            .collect())
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}
