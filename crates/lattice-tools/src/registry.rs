//! Tool registry: validation, whitelisting, and dispatch.
//!
//! The registry owns a compiled JSON-Schema validator per catalog entry.
//! `invoke` checks the grant whitelist, validates the arguments, and then
//! dispatches into the stores or the search orchestrator. No business
//! logic lives here: handlers parse arguments, call one component
//! operation, and shape the result.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use lattice_config::SearchConfig;
use lattice_core::error::{Error, Result};
use lattice_core::search::{FusionStrategy, FusionWeights, ResultTypes, SearchRequest};
use lattice_core::traits::{EmbeddingProvider, ObjectFilters, ObjectSearch, ScoredObject};
use lattice_core::types::{GraphObject, GraphRelationship, Properties};
use lattice_postgres::{
    ChunkStore, CreateObject, CreateRelationship, ListChunks, ListObjects, ListRelationships,
    ObjectStore, PatchObject, PatchRelationship, RelationshipStore, Storage,
};
use lattice_search::{fusion, SearchOrchestrator};

use crate::definitions::{catalog, ToolDefinition};
use crate::traverse::{self, Direction};

/// Which tools a caller may invoke. Agents get the subset they were
/// granted; the engine's own surfaces get everything.
#[derive(Debug, Clone)]
pub struct ToolGrants(Option<HashSet<String>>);

impl ToolGrants {
    pub fn all() -> Self {
        ToolGrants(None)
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolGrants(Some(names.into_iter().map(Into::into).collect()))
    }

    pub fn allows(&self, name: &str) -> bool {
        match &self.0 {
            None => true,
            Some(granted) => granted.contains(name),
        }
    }
}

/// Component handles the tool handlers dispatch into.
#[derive(Clone)]
pub struct ToolContext {
    pub objects: ObjectStore,
    pub relationships: RelationshipStore,
    pub chunks: ChunkStore,
    pub storage: Storage,
    pub orchestrator: Arc<SearchOrchestrator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub search_config: SearchConfig,
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, (ToolDefinition, jsonschema::Validator)>,
    context: ToolContext,
}

impl ToolRegistry {
    pub fn new(context: ToolContext) -> Result<Self> {
        let mut tools = HashMap::new();
        for definition in catalog() {
            let validator = jsonschema::validator_for(&definition.input_schema)
                .map_err(|e| Error::Storage(format!("tool schema failed to compile: {e}")))?;
            tools.insert(definition.name, (definition, validator));
        }
        Ok(ToolRegistry { tools, context })
    }

    /// The catalog visible to one caller, filtered by its grants.
    pub fn catalog_for(&self, grants: &ToolGrants) -> Vec<&ToolDefinition> {
        let mut visible: Vec<&ToolDefinition> = self
            .tools
            .values()
            .map(|(definition, _)| definition)
            .filter(|definition| grants.allows(definition.name))
            .collect();
        visible.sort_by_key(|definition| definition.name);
        visible
    }

    /// Invoke a tool. Unknown names, grant misses, and schema violations
    /// fail before any handler runs.
    pub async fn invoke(&self, name: &str, args: Value, grants: &ToolGrants) -> Result<Value> {
        let (_, validator) = self
            .tools
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unknown tool '{name}'")))?;

        if !grants.allows(name) {
            return Err(Error::Forbidden(format!("tool '{name}' is not granted")));
        }

        if let Err(error) = validator.validate(&args) {
            return Err(Error::bad_request(format!(
                "invalid arguments for '{name}': {error}"
            )));
        }

        debug!(tool = name, "dispatching tool invocation");
        self.dispatch(name, args).await
    }

    /// Like `invoke`, but always yields a stable JSON envelope for the
    /// agent transport: `{ok, result}` or `{ok, error: {code, message}}`.
    pub async fn invoke_enveloped(&self, name: &str, args: Value, grants: &ToolGrants) -> Value {
        match self.invoke(name, args, grants).await {
            Ok(result) => json!({ "ok": true, "result": result }),
            Err(error) => {
                let mut payload = json!({
                    "code": error.code(),
                    "message": error.to_string(),
                });
                if let Error::Validation { field, .. } = &error {
                    payload["field"] = json!(field);
                }
                json!({ "ok": false, "error": payload })
            }
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            "create_entity" => self.create_entity(args).await,
            "get_entity" => self.get_entity(args).await,
            "list_entities" => self.list_entities(args).await,
            "patch_entity" => self.patch_entity(args).await,
            "delete_entity" => self.delete_entity(args).await,
            "restore_entity" => self.restore_entity(args).await,
            "entity_history" => self.entity_history(args).await,
            "entity_edges" => self.entity_edges(args).await,
            "create_relationship" => self.create_relationship(args).await,
            "get_relationship" => self.get_relationship(args).await,
            "list_relationships" => self.list_relationships(args).await,
            "patch_relationship" => self.patch_relationship(args).await,
            "delete_relationship" => self.delete_relationship(args).await,
            "restore_relationship" => self.restore_relationship(args).await,
            "relationship_history" => self.relationship_history(args).await,
            "search_fts" => self.search_fts(args).await,
            "search_vector" => self.search_vector(args).await,
            "search_hybrid" => self.search_hybrid(args).await,
            "search_unified" => self.search_unified(args).await,
            "graph_traverse" => self.graph_traverse(args).await,
            "list_chunks" => self.list_chunks(args).await,
            "delete_chunk" => self.delete_chunk(args).await,
            "delete_chunks_by_document" => self.delete_chunks_by_document(args).await,
            "get_stats" => self.get_stats().await,
            other => Err(Error::not_found(format!("unknown tool '{other}'"))),
        }
    }

    async fn create_entity(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            #[serde(rename = "type")]
            object_type: String,
            properties: Properties,
            #[serde(default)]
            labels: Vec<String>,
            key: Option<String>,
            status: Option<String>,
        }
        let args: Args = parse(args)?;
        let object = self
            .context
            .objects
            .create(
                args.project_id,
                CreateObject {
                    object_type: args.object_type,
                    properties: args.properties,
                    labels: args.labels,
                    key: args.key,
                    status: args.status,
                    actor_id: None,
                    schema_version: None,
                },
                None,
            )
            .await?;
        shape_object(&object)
    }

    async fn get_entity(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        let object = self.context.objects.get(args.project_id, args.id).await?;
        shape_object(&object)
    }

    async fn list_entities(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            #[serde(rename = "type")]
            object_type: Option<String>,
            status: Option<String>,
            #[serde(default)]
            labels: Vec<String>,
            limit: Option<i64>,
            offset: Option<i64>,
        }
        let args: Args = parse(args)?;
        let objects = self
            .context
            .objects
            .list(
                args.project_id,
                ListObjects {
                    object_type: args.object_type,
                    status: args.status,
                    labels: args.labels,
                    limit: args.limit.unwrap_or(50),
                    offset: args.offset.unwrap_or(0),
                },
            )
            .await?;
        let shaped: Result<Vec<Value>> = objects.iter().map(shape_object).collect();
        Ok(json!({ "entities": shaped?, "total": objects.len() }))
    }

    async fn patch_entity(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            id: Uuid,
            properties: Option<Properties>,
            labels: Option<Vec<String>>,
            status: Option<String>,
        }
        let args: Args = parse(args)?;
        let object = self
            .context
            .objects
            .patch(
                args.project_id,
                args.id,
                PatchObject {
                    properties: args.properties,
                    labels: args.labels,
                    status: args.status,
                },
                None,
            )
            .await?;
        shape_object(&object)
    }

    async fn delete_entity(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        self.context.objects.delete(args.project_id, args.id).await?;
        Ok(json!({ "deleted": true, "id": args.id }))
    }

    async fn restore_entity(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        let object = self
            .context
            .objects
            .restore(args.project_id, args.id)
            .await?;
        shape_object(&object)
    }

    async fn entity_history(&self, args: Value) -> Result<Value> {
        let args: CanonicalArgs = parse(args)?;
        let versions = self
            .context
            .objects
            .history(args.project_id, args.canonical_id)
            .await?;
        let shaped: Result<Vec<Value>> = versions.iter().map(shape_object).collect();
        Ok(json!({ "versions": shaped? }))
    }

    async fn entity_edges(&self, args: Value) -> Result<Value> {
        let args: CanonicalArgs = parse(args)?;
        let edges = self
            .context
            .objects
            .edges(args.project_id, args.canonical_id)
            .await?;
        let incoming: Result<Vec<Value>> = edges.incoming.iter().map(shape_relationship).collect();
        let outgoing: Result<Vec<Value>> = edges.outgoing.iter().map(shape_relationship).collect();
        Ok(json!({ "incoming": incoming?, "outgoing": outgoing? }))
    }

    async fn create_relationship(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            #[serde(rename = "type")]
            rel_type: String,
            src_id: Uuid,
            dst_id: Uuid,
            #[serde(default)]
            properties: Properties,
            weight: Option<f64>,
        }
        let args: Args = parse(args)?;
        let relationship = self
            .context
            .relationships
            .create(
                args.project_id,
                CreateRelationship {
                    rel_type: args.rel_type,
                    src_id: args.src_id,
                    dst_id: args.dst_id,
                    properties: args.properties,
                    weight: args.weight,
                },
                None,
            )
            .await?;
        shape_relationship(&relationship)
    }

    async fn get_relationship(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        let relationship = self
            .context
            .relationships
            .get(args.project_id, args.id)
            .await?;
        shape_relationship(&relationship)
    }

    async fn list_relationships(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            #[serde(rename = "type")]
            rel_type: Option<String>,
            src_id: Option<Uuid>,
            dst_id: Option<Uuid>,
            limit: Option<i64>,
            offset: Option<i64>,
        }
        let args: Args = parse(args)?;
        let relationships = self
            .context
            .relationships
            .list(
                args.project_id,
                ListRelationships {
                    rel_type: args.rel_type,
                    src_id: args.src_id,
                    dst_id: args.dst_id,
                    limit: args.limit.unwrap_or(50),
                    offset: args.offset.unwrap_or(0),
                },
            )
            .await?;
        let shaped: Result<Vec<Value>> = relationships.iter().map(shape_relationship).collect();
        Ok(json!({ "relationships": shaped?, "total": relationships.len() }))
    }

    async fn patch_relationship(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            id: Uuid,
            properties: Option<Properties>,
            weight: Option<f64>,
        }
        let args: Args = parse(args)?;
        let relationship = self
            .context
            .relationships
            .patch(
                args.project_id,
                args.id,
                PatchRelationship {
                    properties: args.properties,
                    weight: args.weight,
                },
                None,
            )
            .await?;
        shape_relationship(&relationship)
    }

    async fn delete_relationship(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        self.context
            .relationships
            .delete(args.project_id, args.id)
            .await?;
        Ok(json!({ "deleted": true, "id": args.id }))
    }

    async fn restore_relationship(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        let relationship = self
            .context
            .relationships
            .restore(args.project_id, args.id)
            .await?;
        shape_relationship(&relationship)
    }

    async fn relationship_history(&self, args: Value) -> Result<Value> {
        let args: CanonicalArgs = parse(args)?;
        let versions = self
            .context
            .relationships
            .history(args.project_id, args.canonical_id)
            .await?;
        let shaped: Result<Vec<Value>> = versions.iter().map(shape_relationship).collect();
        Ok(json!({ "versions": shaped? }))
    }

    async fn search_fts(&self, args: Value) -> Result<Value> {
        let args: ObjectSearchArgs = parse(args)?;
        let hits = self
            .context
            .objects
            .search_objects_fts(
                args.project_id,
                &args.query,
                &args.filters(),
                args.limit(),
            )
            .await?;
        shape_object_hits(&hits)
    }

    async fn search_vector(&self, args: Value) -> Result<Value> {
        let args: ObjectSearchArgs = parse(args)?;
        let vector = self.context.embedder.embed(&args.query, None).await?;
        let hits = self
            .context
            .objects
            .search_objects_vector(
                args.project_id,
                &vector,
                &args.filters(),
                args.limit(),
                args.max_distance,
            )
            .await?;
        shape_object_hits(&hits)
    }

    /// Objects-only hybrid probe: FTS and vector merged per object with the
    /// best score across modalities, lexical side max-normalized.
    async fn search_hybrid(&self, args: Value) -> Result<Value> {
        let args: ObjectSearchArgs = parse(args)?;
        let filters = args.filters();
        let limit = args.limit();

        let lexical = self
            .context
            .objects
            .search_objects_fts(args.project_id, &args.query, &filters, limit)
            .await?;
        let semantic = match self.context.embedder.embed(&args.query, None).await {
            Ok(vector) => {
                self.context
                    .objects
                    .search_objects_vector(args.project_id, &vector, &filters, limit, None)
                    .await?
            }
            Err(error) => {
                tracing::warn!(%error, "hybrid search degrading to lexical only");
                Vec::new()
            }
        };

        let mut lexical_scores: Vec<f64> = lexical.iter().map(|h| h.score).collect();
        fusion::max_normalize(&mut lexical_scores);

        let mut merged: HashMap<Uuid, ScoredObject> = HashMap::new();
        for (hit, score) in lexical.into_iter().zip(lexical_scores) {
            merged.insert(
                hit.object.id,
                ScoredObject {
                    object: hit.object,
                    score,
                },
            );
        }
        for hit in semantic {
            let better = merged
                .get(&hit.object.id)
                .map(|existing| hit.score > existing.score)
                .unwrap_or(true);
            if better {
                merged.insert(hit.object.id, hit);
            }
        }

        let mut hits: Vec<ScoredObject> = merged.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.object.updated_at.cmp(&a.object.updated_at))
                .then_with(|| a.object.id.cmp(&b.object.id))
        });
        hits.truncate(limit);
        shape_object_hits(&hits)
    }

    async fn search_unified(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            query: String,
            #[serde(default, rename = "resultTypes")]
            result_types: Option<ResultTypes>,
            #[serde(default, rename = "graphTypes")]
            graph_types: Vec<String>,
            #[serde(default, rename = "relationshipTypes")]
            relationship_types: Vec<String>,
            #[serde(default)]
            labels: Vec<String>,
            limit: Option<usize>,
            #[serde(default, rename = "fusionStrategy")]
            fusion_strategy: Option<FusionStrategy>,
            weights: Option<FusionWeights>,
            #[serde(default, rename = "includeDebug")]
            include_debug: bool,
        }
        let args: Args = parse(args)?;

        let defaults = &self.context.search_config;
        let request = SearchRequest {
            project_id: args.project_id,
            query: Some(args.query),
            vector: None,
            result_types: args.result_types.unwrap_or_default(),
            graph_types: args.graph_types,
            relationship_types: args.relationship_types,
            labels: args.labels,
            limit: args.limit.unwrap_or(defaults.default_limit),
            fusion_strategy: args.fusion_strategy.unwrap_or_default(),
            weights: args.weights.unwrap_or(FusionWeights {
                graph_weight: defaults.graph_weight,
                text_weight: defaults.text_weight,
            }),
            include_debug: args.include_debug,
        };

        let response = self.context.orchestrator.unified_search(request, None).await?;
        serde_json::to_value(&response).map_err(|e| Error::Storage(e.to_string()))
    }

    async fn graph_traverse(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            seed_id: Uuid,
            max_hops: Option<usize>,
            direction: Option<Direction>,
        }
        let args: Args = parse(args)?;
        let traversal = traverse::traverse(
            &self.context.objects,
            args.project_id,
            args.seed_id,
            args.max_hops.unwrap_or(3),
            args.direction.unwrap_or(Direction::Both),
        )
        .await?;
        serde_json::to_value(&traversal).map_err(|e| Error::Storage(e.to_string()))
    }

    async fn list_chunks(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            document_id: Option<Uuid>,
            limit: Option<i64>,
            offset: Option<i64>,
        }
        let args: Args = parse(args)?;
        let chunks = self
            .context
            .chunks
            .list(
                args.project_id,
                ListChunks {
                    document_id: args.document_id,
                    limit: args.limit.unwrap_or(50),
                    offset: args.offset.unwrap_or(0),
                },
            )
            .await?;
        let shaped: Vec<Value> = chunks
            .iter()
            .map(|chunk| {
                json!({
                    "id": chunk.id,
                    "document_id": chunk.document_id,
                    "chunk_index": chunk.chunk_index,
                    "text": chunk.text,
                    "has_embedding": chunk.has_embedding,
                })
            })
            .collect();
        Ok(json!({ "chunks": shaped, "total": shaped.len() }))
    }

    async fn delete_chunk(&self, args: Value) -> Result<Value> {
        let args: IdArgs = parse(args)?;
        self.context.chunks.delete(args.project_id, args.id).await?;
        Ok(json!({ "deleted": true, "id": args.id }))
    }

    async fn delete_chunks_by_document(&self, args: Value) -> Result<Value> {
        #[derive(Deserialize)]
        struct Args {
            project_id: Uuid,
            document_ids: Vec<Uuid>,
        }
        let args: Args = parse(args)?;
        let counts = self
            .context
            .chunks
            .bulk_delete_by_documents(args.project_id, &args.document_ids)
            .await?;
        let shaped: Vec<Value> = counts
            .iter()
            .map(|(document_id, count)| json!({ "document_id": document_id, "deleted": count }))
            .collect();
        Ok(json!({ "documents": shaped }))
    }

    async fn get_stats(&self) -> Result<Value> {
        let counts = self.context.storage.table_counts().await?;
        let mut stats = serde_json::Map::new();
        for (table, count) in counts {
            stats.insert(table, json!(count));
        }
        Ok(Value::Object(stats))
    }
}

#[derive(Deserialize)]
struct IdArgs {
    project_id: Uuid,
    id: Uuid,
}

#[derive(Deserialize)]
struct CanonicalArgs {
    project_id: Uuid,
    canonical_id: Uuid,
}

#[derive(Deserialize)]
struct ObjectSearchArgs {
    project_id: Uuid,
    query: String,
    #[serde(default, rename = "types")]
    object_types: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
    limit: Option<usize>,
    max_distance: Option<f64>,
}

impl ObjectSearchArgs {
    fn filters(&self) -> ObjectFilters {
        ObjectFilters {
            object_types: self.object_types.clone(),
            labels: self.labels.clone(),
        }
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(20)
    }
}

fn parse<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::bad_request(format!("malformed arguments: {e}")))
}

/// Serialize an entity for the wire, dropping the raw embedding vector.
fn shape_object(object: &GraphObject) -> Result<Value> {
    let mut value = serde_json::to_value(object).map_err(|e| Error::Storage(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("embedding");
        map.insert("has_embedding".to_string(), json!(object.embedding.is_some()));
    }
    Ok(value)
}

fn shape_relationship(relationship: &GraphRelationship) -> Result<Value> {
    let mut value =
        serde_json::to_value(relationship).map_err(|e| Error::Storage(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("embedding");
        map.insert(
            "has_embedding".to_string(),
            json!(relationship.embedding.is_some()),
        );
    }
    Ok(value)
}

fn shape_object_hits(hits: &[ScoredObject]) -> Result<Value> {
    let shaped: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "id": hit.object.id,
                "type": hit.object.object_type,
                "key": hit.object.key,
                "score": hit.score,
                "fields": hit.object.properties,
            })
        })
        .collect();
    Ok(json!({ "results": shaped, "total": shaped.len() }))
}
