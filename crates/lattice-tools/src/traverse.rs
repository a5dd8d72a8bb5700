//! Breadth-first graph traversal.
//!
//! Walks active relationships outward from a seed entity, hop by hop, with
//! a hard cap on visited nodes so a dense graph cannot run away. The edge
//! lookup sits behind a trait so traversal is testable on an in-memory
//! adjacency map.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use lattice_core::error::Result;
use lattice_postgres::ObjectStore;

/// Hard ceiling on visited nodes per traversal.
pub const MAX_VISITED: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// One active edge touching a node.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub relationship_id: Uuid,
    pub rel_type: String,
    pub src_id: Uuid,
    pub dst_id: Uuid,
}

/// Edge lookup seam; implemented by the object store and by test stubs.
#[async_trait]
pub trait EdgeSource: Send + Sync {
    /// All active edges touching `canonical_id`, both directions.
    async fn neighbors(&self, project_id: Uuid, canonical_id: Uuid) -> Result<Vec<Edge>>;
}

#[async_trait]
impl EdgeSource for ObjectStore {
    async fn neighbors(&self, project_id: Uuid, canonical_id: Uuid) -> Result<Vec<Edge>> {
        let edges = self.edges(project_id, canonical_id).await?;
        Ok(edges
            .outgoing
            .into_iter()
            .chain(edges.incoming)
            .map(|rel| Edge {
                relationship_id: rel.id,
                rel_type: rel.rel_type,
                src_id: rel.src_id,
                dst_id: rel.dst_id,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraversalNode {
    pub canonical_id: Uuid,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Traversal {
    pub nodes: Vec<TraversalNode>,
    pub edges: Vec<Edge>,
    /// True when the visited-node cap cut the walk short
    pub truncated: bool,
}

/// BFS from `seed_id` up to `max_hops`, following edges in `direction`.
pub async fn traverse(
    source: &dyn EdgeSource,
    project_id: Uuid,
    seed_id: Uuid,
    max_hops: usize,
    direction: Direction,
) -> Result<Traversal> {
    traverse_with_cap(source, project_id, seed_id, max_hops, direction, MAX_VISITED).await
}

async fn traverse_with_cap(
    source: &dyn EdgeSource,
    project_id: Uuid,
    seed_id: Uuid,
    max_hops: usize,
    direction: Direction,
    cap: usize,
) -> Result<Traversal> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut nodes: Vec<TraversalNode> = Vec::new();
    let mut collected_edges: Vec<Edge> = Vec::new();
    let mut seen_edges: HashSet<Uuid> = HashSet::new();
    let mut truncated = false;

    let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();
    queue.push_back((seed_id, 0));
    visited.insert(seed_id);

    while let Some((current, depth)) = queue.pop_front() {
        nodes.push(TraversalNode {
            canonical_id: current,
            depth,
        });
        if depth >= max_hops {
            continue;
        }

        for edge in source.neighbors(project_id, current).await? {
            let next = match direction {
                Direction::Outgoing if edge.src_id == current => edge.dst_id,
                Direction::Incoming if edge.dst_id == current => edge.src_id,
                Direction::Both => {
                    if edge.src_id == current {
                        edge.dst_id
                    } else {
                        edge.src_id
                    }
                }
                _ => continue,
            };

            if seen_edges.insert(edge.relationship_id) {
                collected_edges.push(edge);
            }
            if visited.contains(&next) {
                continue;
            }
            if visited.len() >= cap {
                truncated = true;
                continue;
            }
            visited.insert(next);
            queue.push_back((next, depth + 1));
        }
    }

    Ok(Traversal {
        nodes,
        edges: collected_edges,
        truncated,
    })
}
