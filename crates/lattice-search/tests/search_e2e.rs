//! End-to-end unified search against a live Postgres with pgvector.
//!
//! Set `LATTICE_TEST_DSN` and run with `--ignored`. Uses the deterministic
//! mock embedder, so triplet and chunk vectors are stable across runs.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lattice_config::{SearchConfig, StorageConfig};
use lattice_core::search::{FusionStrategy, ResultTypes, SearchItem, SearchRequest};
use lattice_core::types::Properties;
use lattice_core::Document;
use lattice_embed::MockEmbedder;
use lattice_postgres::{
    ChunkStore, CreateObject, CreateRelationship, DocumentStore, ObjectStore, RelationshipStore,
    Storage,
};
use lattice_search::SearchOrchestrator;

use lattice_core::schema::{
    CompiledSchema, PropertyKind, PropertySchema, RelationshipTypeSchema, SchemaRegistry,
    TemplatePack, TypeSchema,
};

struct Engine {
    objects: ObjectStore,
    relationships: RelationshipStore,
    chunks: ChunkStore,
    documents: DocumentStore,
    orchestrator: SearchOrchestrator,
    project_id: Uuid,
}

async fn engine() -> Engine {
    let dsn = std::env::var("LATTICE_TEST_DSN")
        .expect("LATTICE_TEST_DSN must point at a Postgres with pgvector");
    let storage = Storage::connect(&StorageConfig {
        dsn,
        ..Default::default()
    })
    .await
    .expect("connect");
    storage.ensure_schema().await.expect("bootstrap schema");

    let pack = TemplatePack {
        name: "test".to_string(),
        version: "1.0.0".to_string(),
        object_types: vec![
            TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required()),
            TypeSchema::new("Company")
                .with_property("name", PropertySchema::new(PropertyKind::String).required()),
            TypeSchema::new("Requirement")
                .with_property("title", PropertySchema::new(PropertyKind::String).required()),
        ],
        relationship_types: vec![
            RelationshipTypeSchema::new("FOUNDED").with_endpoints("Person", "Company")
        ],
    };
    let registry = Arc::new(SchemaRegistry::new(
        CompiledSchema::compile("1.0.0", &[pack]).unwrap(),
    ));
    let embedder = Arc::new(MockEmbedder::new());

    let objects = ObjectStore::new(storage.clone(), registry.clone(), embedder.clone());
    let relationships = RelationshipStore::new(
        storage.clone(),
        objects.clone(),
        registry,
        embedder.clone(),
    );
    let chunks = ChunkStore::new(storage.clone());
    let documents = DocumentStore::new(storage.clone());

    let orchestrator = SearchOrchestrator::new(
        Arc::new(objects.clone()),
        Arc::new(relationships.clone()),
        Arc::new(chunks.clone()),
        embedder,
        None,
        SearchConfig::default(),
    );

    Engine {
        objects,
        relationships,
        chunks,
        documents,
        orchestrator,
        project_id: Uuid::new_v4(),
    }
}

fn named(object_type: &str, field: &str, value: &str) -> CreateObject {
    let mut properties = Properties::new();
    properties.insert(field.to_string(), json!(value));
    CreateObject {
        object_type: object_type.to_string(),
        properties,
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn founded_triplet_is_retrievable_through_graph_search() {
    let engine = engine().await;

    let elon = engine
        .objects
        .create(engine.project_id, named("Person", "name", "Elon Musk"), None)
        .await
        .unwrap();
    let tesla = engine
        .objects
        .create(engine.project_id, named("Company", "name", "Tesla"), None)
        .await
        .unwrap();
    let founded = engine
        .relationships
        .create(
            engine.project_id,
            CreateRelationship {
                rel_type: "FOUNDED".to_string(),
                src_id: elon.canonical_id,
                dst_id: tesla.canonical_id,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert!(founded.embedding.is_some());
    assert_eq!(
        founded.triplet_text.as_deref(),
        Some("Elon Musk founded Tesla")
    );

    let response = engine
        .orchestrator
        .unified_search(
            SearchRequest {
                project_id: engine.project_id,
                query: Some("who founded tesla".to_string()),
                result_types: ResultTypes::Graph,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let relationship = response
        .results
        .iter()
        .find_map(|item| match item {
            SearchItem::Relationship {
                relationship_type,
                source_id,
                target_id,
                ..
            } => Some((relationship_type.clone(), *source_id, *target_id)),
            _ => None,
        })
        .expect("a relationship item in graph results");

    assert_eq!(relationship.0, "FOUNDED");
    assert_eq!(relationship.1, elon.canonical_id);
    assert_eq!(relationship.2, tesla.canonical_id);
    assert_eq!(response.metadata.text_result_count, 0);
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn fusion_strategy_controls_stream_precedence() {
    let engine = engine().await;

    for title in ["Authentication requirements", "Authentication token rules"] {
        engine
            .objects
            .create(engine.project_id, named("Requirement", "title", title), None)
            .await
            .unwrap();
    }

    let document = Document::new(engine.project_id, "auth.md", format!("hash-{}", Uuid::new_v4()));
    engine.documents.insert(&document).await.unwrap();
    for (index, text) in [
        "The authentication flow begins at the login endpoint.",
        "Session authentication flow details and token refresh.",
    ]
    .iter()
    .enumerate()
    {
        engine
            .chunks
            .insert(document.id, index as i32, text, None)
            .await
            .unwrap();
    }

    let base = SearchRequest {
        project_id: engine.project_id,
        query: Some("authentication".to_string()),
        limit: 4,
        ..Default::default()
    };

    let graph_first = engine
        .orchestrator
        .unified_search(
            SearchRequest {
                fusion_strategy: FusionStrategy::GraphFirst,
                ..base.clone()
            },
            None,
        )
        .await
        .unwrap();
    let kinds: Vec<u8> = graph_first.results.iter().map(|r| r.type_priority()).collect();
    assert_eq!(graph_first.results.len(), 4);
    assert!(
        matches!(graph_first.results[0], SearchItem::Graph { .. })
            && matches!(graph_first.results[1], SearchItem::Graph { .. }),
        "graph items must lead, got priorities {kinds:?}"
    );

    let text_first = engine
        .orchestrator
        .unified_search(
            SearchRequest {
                fusion_strategy: FusionStrategy::TextFirst,
                ..base
            },
            None,
        )
        .await
        .unwrap();
    assert!(
        matches!(text_first.results[0], SearchItem::Text { .. })
            && matches!(text_first.results[1], SearchItem::Text { .. }),
        "text items must lead under text_first"
    );
}
