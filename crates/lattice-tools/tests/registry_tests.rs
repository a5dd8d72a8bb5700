//! Boundary behavior of the tool registry: grants, argument validation,
//! and error envelopes. Uses a lazy pool, so no database is required;
//! every case here fails (or succeeds) before touching storage.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lattice_config::SearchConfig;
use lattice_core::schema::{
    CompiledSchema, PropertyKind, PropertySchema, SchemaRegistry, TemplatePack, TypeSchema,
};
use lattice_embed::MockEmbedder;
use lattice_postgres::{ChunkStore, ObjectStore, RelationshipStore, Storage};
use lattice_search::SearchOrchestrator;
use lattice_tools::{ToolContext, ToolGrants, ToolRegistry};

fn registry() -> ToolRegistry {
    let pack = TemplatePack {
        name: "test".to_string(),
        version: "1.0.0".to_string(),
        object_types: vec![TypeSchema::new("Person")
            .with_property("name", PropertySchema::new(PropertyKind::String).required())],
        relationship_types: vec![],
    };
    let schema_registry = Arc::new(SchemaRegistry::new(
        CompiledSchema::compile("1.0.0", &[pack]).unwrap(),
    ));

    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/never_connected")
        .expect("lazy pool");
    let storage = Storage::from_pool(pool);
    let embedder = Arc::new(MockEmbedder::new());

    let objects = ObjectStore::new(storage.clone(), schema_registry.clone(), embedder.clone());
    let relationships = RelationshipStore::new(
        storage.clone(),
        objects.clone(),
        schema_registry,
        embedder.clone(),
    );
    let chunks = ChunkStore::new(storage.clone());

    let orchestrator = Arc::new(SearchOrchestrator::new(
        Arc::new(objects.clone()),
        Arc::new(relationships.clone()),
        Arc::new(chunks.clone()),
        embedder.clone(),
        None,
        SearchConfig::default(),
    ));

    ToolRegistry::new(ToolContext {
        objects,
        relationships,
        chunks,
        storage,
        orchestrator,
        embedder,
        search_config: SearchConfig::default(),
    })
    .expect("catalog schemas compile")
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let registry = registry();
    let err = registry
        .invoke("summon_demons", json!({}), &ToolGrants::all())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn ungranted_tool_is_forbidden() {
    let registry = registry();
    let grants = ToolGrants::only(["get_entity"]);

    let err = registry
        .invoke(
            "delete_entity",
            json!({ "project_id": Uuid::new_v4(), "id": Uuid::new_v4() }),
            &grants,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");
}

#[tokio::test]
async fn catalog_is_filtered_by_grants() {
    let registry = registry();

    let full = registry.catalog_for(&ToolGrants::all());
    assert!(full.len() >= 20);

    let narrow = registry.catalog_for(&ToolGrants::only(["search_unified", "get_entity"]));
    let names: Vec<&str> = narrow.iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["get_entity", "search_unified"]);
}

#[tokio::test]
async fn missing_required_argument_is_rejected_by_schema() {
    let registry = registry();
    let err = registry
        .invoke(
            "create_entity",
            json!({ "project_id": Uuid::new_v4() }),
            &ToolGrants::all(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
    assert!(err.to_string().contains("create_entity"));
}

#[tokio::test]
async fn unexpected_argument_is_rejected_by_schema() {
    let registry = registry();
    let err = registry
        .invoke(
            "get_entity",
            json!({
                "project_id": Uuid::new_v4(),
                "id": Uuid::new_v4(),
                "surprise": true
            }),
            &ToolGrants::all(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn malformed_uuid_is_rejected_before_dispatch_hits_storage() {
    let registry = registry();
    let err = registry
        .invoke(
            "get_entity",
            json!({ "project_id": "not-a-uuid", "id": "also-not" }),
            &ToolGrants::all(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn schema_validation_errors_keep_the_field_path() {
    let registry = registry();

    // Unknown object type fails type-schema lookup before any SQL runs.
    let envelope = registry
        .invoke_enveloped(
            "create_entity",
            json!({
                "project_id": Uuid::new_v4(),
                "type": "Starship",
                "properties": { "name": "Heart of Gold" }
            }),
            &ToolGrants::all(),
        )
        .await;

    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("validation_error"));
    assert_eq!(envelope["error"]["field"], json!("type"));
}

#[tokio::test]
async fn envelope_wraps_success_payloads() {
    let registry = registry();

    // Query too long fails the search request validation, proving the
    // envelope carries orchestrator errors too.
    let envelope = registry
        .invoke_enveloped(
            "search_unified",
            json!({
                "project_id": Uuid::new_v4(),
                "query": "q".repeat(801)
            }),
            &ToolGrants::all(),
        )
        .await;
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["code"], json!("bad_request"));
}
