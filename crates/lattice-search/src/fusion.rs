//! Fusion strategies over per-stream rankings.
//!
//! Input: up to three ranked streams (objects, relationships, chunks), each
//! already normalized to [0, 1]. Output: one ranked, deduplicated list cut
//! to the request limit. All strategies are pure functions so they can be
//! tested without any storage.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use lattice_core::search::{FusionStrategy, FusionWeights, SearchItem};

/// The three retrieval streams, in graph-first order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Objects,
    Relationships,
    Chunks,
}

impl StreamKind {
    /// Chunks take the text weight; objects and relationships share the
    /// graph weight.
    fn weight(self, weights: FusionWeights) -> f64 {
        match self {
            StreamKind::Objects | StreamKind::Relationships => weights.graph_weight,
            StreamKind::Chunks => weights.text_weight,
        }
    }
}

/// Which retrieval modalities contributed to a stream hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modalities {
    pub lexical: bool,
    pub vector: bool,
}

/// One candidate entering fusion, with its normalized per-stream score and
/// rank within its stream (0-based, best first).
#[derive(Debug, Clone)]
pub struct StreamHit {
    pub stream: StreamKind,
    pub item: SearchItem,
    pub stream_score: f64,
    pub rank: usize,
    pub modalities: Modalities,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub strategy: FusionStrategy,
    pub weights: FusionWeights,
    pub rrf_k: f64,
    pub limit: usize,
}

/// Fuse the streams into the final ranked list.
pub fn fuse(
    objects: Vec<StreamHit>,
    relationships: Vec<StreamHit>,
    chunks: Vec<StreamHit>,
    config: &FusionConfig,
) -> Vec<SearchItem> {
    let weights = config.weights.normalized();
    match config.strategy {
        FusionStrategy::Weighted => {
            scored_fusion(&[objects, relationships, chunks], config.limit, |hit| {
                hit.stream.weight(weights) * hit.stream_score
            })
        }
        FusionStrategy::Rrf => {
            scored_fusion(&[objects, relationships, chunks], config.limit, |hit| {
                1.0 / (config.rrf_k + hit.rank as f64 + 1.0)
            })
        }
        FusionStrategy::Interleave => interleave(&[objects, relationships, chunks], config.limit),
        FusionStrategy::GraphFirst => {
            concatenate(&[objects, relationships, chunks], config.limit)
        }
        FusionStrategy::TextFirst => {
            concatenate(&[chunks, objects, relationships], config.limit)
        }
    }
}

/// Dedup key: item kind plus id. Ids are unique within a kind; a chunk and
/// an object can never collapse into each other.
fn key(item: &SearchItem) -> (u8, Uuid) {
    (item.type_priority(), item.id())
}

/// Sum-or-max style fusion: compute a fused score per hit, collapse
/// duplicates by summing their contributions, sort with the canonical
/// tie-breaks, truncate.
fn scored_fusion<F>(streams: &[Vec<StreamHit>; 3], limit: usize, score_fn: F) -> Vec<SearchItem>
where
    F: Fn(&StreamHit) -> f64,
{
    let mut fused: Vec<(f64, StreamHit)> = Vec::new();
    for stream in streams {
        for hit in stream {
            let contribution = score_fn(hit);
            match fused.iter_mut().find(|(_, h)| key(&h.item) == key(&hit.item)) {
                Some((score, _)) => *score += contribution,
                None => fused.push((contribution, hit.clone())),
            }
        }
    }

    sort_hits(&mut fused);

    fused
        .into_iter()
        .take(limit)
        .map(|(score, hit)| {
            let mut item = hit.item;
            item.set_score(score);
            item
        })
        .collect()
}

/// Round-robin across streams by descending per-stream score, deduped.
fn interleave(streams: &[Vec<StreamHit>; 3], limit: usize) -> Vec<SearchItem> {
    let mut cursors = [0usize; 3];
    let mut out: Vec<SearchItem> = Vec::new();
    let mut seen: Vec<(u8, Uuid)> = Vec::new();

    while out.len() < limit {
        let mut progressed = false;
        for (index, stream) in streams.iter().enumerate() {
            if out.len() >= limit {
                break;
            }
            while cursors[index] < stream.len() {
                let hit = &stream[cursors[index]];
                cursors[index] += 1;
                if seen.contains(&key(&hit.item)) {
                    continue;
                }
                seen.push(key(&hit.item));
                let mut item = hit.item.clone();
                item.set_score(hit.stream_score);
                out.push(item);
                progressed = true;
                break;
            }
        }
        if !progressed {
            break;
        }
    }

    out
}

/// Concatenate whole streams in the given precedence order, deduped.
fn concatenate(streams: &[Vec<StreamHit>; 3], limit: usize) -> Vec<SearchItem> {
    let mut out: Vec<SearchItem> = Vec::new();
    let mut seen: Vec<(u8, Uuid)> = Vec::new();

    for stream in streams {
        for hit in stream {
            if out.len() >= limit {
                return out;
            }
            if seen.contains(&key(&hit.item)) {
                continue;
            }
            seen.push(key(&hit.item));
            let mut item = hit.item.clone();
            item.set_score(hit.stream_score);
            out.push(item);
        }
    }

    out
}

/// Canonical ordering: fused score descending, then type priority
/// (graph > relationship > text), then recency, then id.
fn sort_hits(hits: &mut [(f64, StreamHit)]) {
    hits.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item.type_priority().cmp(&b.item.type_priority()))
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.item.id().cmp(&b.item.id()))
    });
}

/// Divide lexical scores by the stream maximum so they land in [0, 1].
/// Vector similarities already live there.
pub fn max_normalize(scores: &mut [f64]) {
    let max = scores.iter().copied().fold(0.0_f64, f64::max);
    if max > 0.0 {
        for score in scores.iter_mut() {
            *score /= max;
        }
    }
}
