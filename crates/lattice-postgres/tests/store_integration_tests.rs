//! Store lifecycle tests against a live Postgres with pgvector.
//!
//! These need a real database: set `LATTICE_TEST_DSN` (for example
//! `postgres://lattice@localhost/lattice_test`) and run with `--ignored`.
//! Every test works in a fresh project id, so a shared database is fine.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use lattice_config::StorageConfig;
use lattice_core::schema::{
    CompiledSchema, PropertyKind, PropertySchema, RelationshipTypeSchema, SchemaRegistry,
    TemplatePack, TypeSchema,
};
use lattice_core::traits::EmbeddingProvider;
use lattice_core::types::Properties;
use lattice_core::Error;
use lattice_embed::MockEmbedder;
use lattice_postgres::{
    ChunkStore, CreateObject, CreateRelationship, DocumentStore, ListChunks, ObjectStore,
    PatchObject, RelationshipStore, Storage,
};

fn test_dsn() -> String {
    std::env::var("LATTICE_TEST_DSN")
        .expect("LATTICE_TEST_DSN must point at a Postgres with pgvector")
}

fn test_packs() -> Vec<TemplatePack> {
    vec![TemplatePack {
        name: "test-pack".to_string(),
        version: "1.0.0".to_string(),
        object_types: vec![
            TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())
                .with_property("email", PropertySchema::new(PropertyKind::String)),
            TypeSchema::new("Company")
                .with_property("name", PropertySchema::new(PropertyKind::String).required()),
            TypeSchema::new("Requirement")
                .with_property("title", PropertySchema::new(PropertyKind::String).required())
                .with_property("content", PropertySchema::new(PropertyKind::String)),
        ],
        relationship_types: vec![
            RelationshipTypeSchema::new("FOUNDED").with_endpoints("Person", "Company"),
            RelationshipTypeSchema::new("WORKS_FOR").with_endpoints("Person", "Company"),
            RelationshipTypeSchema::new("DEPENDS_ON"),
        ],
    }]
}

fn registry() -> Arc<SchemaRegistry> {
    let compiled = CompiledSchema::compile("1.0.0", &test_packs()).unwrap();
    Arc::new(SchemaRegistry::new(compiled))
}

struct Fixture {
    storage: Storage,
    objects: ObjectStore,
    relationships: RelationshipStore,
    chunks: ChunkStore,
    documents: DocumentStore,
    project_id: Uuid,
}

async fn fixture_with(embedder: Arc<dyn EmbeddingProvider>) -> Fixture {
    let config = StorageConfig {
        dsn: test_dsn(),
        ..Default::default()
    };
    let storage = Storage::connect(&config).await.expect("connect");
    storage.ensure_schema().await.expect("bootstrap schema");

    let registry = registry();
    let objects = ObjectStore::new(storage.clone(), registry.clone(), embedder.clone());
    let relationships = RelationshipStore::new(
        storage.clone(),
        objects.clone(),
        registry.clone(),
        embedder,
    );
    let chunks = ChunkStore::new(storage.clone());
    let documents = DocumentStore::new(storage.clone());

    Fixture {
        storage,
        objects,
        relationships,
        chunks,
        documents,
        project_id: Uuid::new_v4(),
    }
}

async fn fixture() -> Fixture {
    fixture_with(Arc::new(MockEmbedder::new())).await
}

fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn person(name: &str) -> CreateObject {
    CreateObject {
        object_type: "Person".to_string(),
        properties: props(&[("name", json!(name))]),
        ..Default::default()
    }
}

fn company(name: &str) -> CreateObject {
    CreateObject {
        object_type: "Company".to_string(),
        properties: props(&[("name", json!(name))]),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn object_lifecycle_create_patch_delete_restore() {
    let f = fixture().await;

    let created = f
        .objects
        .create(f.project_id, person("Ada Lovelace"), None)
        .await
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.id, created.canonical_id);
    assert!(created.embedding.is_some());

    // Round-trip: stored properties contain what was sent
    let fetched = f.objects.get(f.project_id, created.id).await.unwrap();
    assert_eq!(fetched.properties.get("name"), Some(&json!("Ada Lovelace")));

    let patched = f
        .objects
        .patch(
            f.project_id,
            created.id,
            PatchObject {
                properties: Some(props(&[("email", json!("ada@example.com"))])),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(patched.version, 2);
    assert_eq!(patched.canonical_id, created.canonical_id);
    assert_eq!(patched.properties.get("name"), Some(&json!("Ada Lovelace")));
    assert_eq!(
        patched.properties.get("email"),
        Some(&json!("ada@example.com"))
    );

    // Exactly one active version at any time
    let active = f
        .objects
        .get_active(f.project_id, created.canonical_id)
        .await
        .unwrap();
    assert_eq!(active.id, patched.id);

    let history = f
        .objects
        .history(f.project_id, created.canonical_id)
        .await
        .unwrap();
    assert_eq!(
        history.iter().map(|o| o.version).collect::<Vec<_>>(),
        vec![2, 1]
    );
    assert_eq!(
        history.iter().filter(|o| o.deleted_at.is_none()).count(),
        1
    );

    f.objects.delete(f.project_id, patched.id).await.unwrap();
    let err = f
        .objects
        .get_active(f.project_id, created.canonical_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    // Restore yields a fresh active version above every prior one
    let restored = f
        .objects
        .restore(f.project_id, patched.id)
        .await
        .unwrap();
    assert!(restored.version > patched.version);
    assert!(restored.deleted_at.is_none());
    assert_eq!(
        restored.properties.get("email"),
        Some(&json!("ada@example.com"))
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn duplicate_active_key_is_a_conflict() {
    let f = fixture().await;

    let mut first = person("Grace Hopper");
    first.key = Some("grace".to_string());
    f.objects.create(f.project_id, first, None).await.unwrap();

    let mut second = person("Grace Impostor");
    second.key = Some("grace".to_string());
    let err = f.objects.create(f.project_id, second, None).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn invalid_payload_is_rejected_with_field_path() {
    let f = fixture().await;

    let bad = CreateObject {
        object_type: "Person".to_string(),
        properties: props(&[("name", json!(42))]),
        ..Default::default()
    };
    match f.objects.create(f.project_id, bad, None).await.unwrap_err() {
        Error::Validation { field, .. } => assert_eq!(field, "properties.name"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn relationship_create_builds_and_embeds_triplet() {
    let f = fixture().await;

    let elon = f
        .objects
        .create(f.project_id, person("Elon Musk"), None)
        .await
        .unwrap();
    let tesla = f
        .objects
        .create(f.project_id, company("Tesla"), None)
        .await
        .unwrap();

    let founded = f
        .relationships
        .create(
            f.project_id,
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

    assert_eq!(
        founded.triplet_text.as_deref(),
        Some("Elon Musk founded Tesla")
    );
    assert!(founded.embedding.is_some());
    assert!(founded.embedding_updated_at.is_some());

    let edges = f
        .objects
        .edges(f.project_id, elon.canonical_id)
        .await
        .unwrap();
    assert_eq!(edges.outgoing.len(), 1);
    assert!(edges.incoming.is_empty());
    assert_eq!(edges.outgoing[0].dst_id, tesla.canonical_id);
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn relationship_create_is_idempotent_until_properties_differ() {
    let f = fixture().await;

    let a = f.objects.create(f.project_id, person("A"), None).await.unwrap();
    let b = f.objects.create(f.project_id, company("B"), None).await.unwrap();

    let args = CreateRelationship {
        rel_type: "DEPENDS_ON".to_string(),
        src_id: a.canonical_id,
        dst_id: b.canonical_id,
        properties: props(&[("reason", json!("test"))]),
        ..Default::default()
    };

    let first = f
        .relationships
        .create(f.project_id, args.clone(), None)
        .await
        .unwrap();
    let second = f
        .relationships
        .create(f.project_id, args.clone(), None)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.version, 1);

    let mut different = args;
    different.properties = props(&[("reason", json!("other"))]);
    let third = f
        .relationships
        .create(f.project_id, different, None)
        .await
        .unwrap();
    assert_eq!(third.canonical_id, first.canonical_id);
    assert_eq!(third.version, 2);
    assert_ne!(third.id, first.id);
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn self_loops_and_missing_endpoints_are_rejected() {
    let f = fixture().await;

    let a = f.objects.create(f.project_id, person("A"), None).await.unwrap();
    let b = f.objects.create(f.project_id, company("B"), None).await.unwrap();

    let self_loop = CreateRelationship {
        rel_type: "DEPENDS_ON".to_string(),
        src_id: a.canonical_id,
        dst_id: a.canonical_id,
        ..Default::default()
    };
    let err = f
        .relationships
        .create(f.project_id, self_loop, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    // Endpoint type pairs are enforced from the edge schema
    let wrong_direction = CreateRelationship {
        rel_type: "FOUNDED".to_string(),
        src_id: b.canonical_id,
        dst_id: a.canonical_id,
        ..Default::default()
    };
    let err = f
        .relationships
        .create(f.project_id, wrong_direction, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    // Tombstoned endpoints stop qualifying
    f.objects.delete(f.project_id, b.id).await.unwrap();
    let dangling = CreateRelationship {
        rel_type: "FOUNDED".to_string(),
        src_id: a.canonical_id,
        dst_id: b.canonical_id,
        ..Default::default()
    };
    let err = f
        .relationships
        .create(f.project_id, dangling, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn embedding_failure_soft_fails_and_backfill_recovers() {
    let f = fixture_with(Arc::new(MockEmbedder::failing())).await;

    let a = f.objects.create(f.project_id, person("A"), None).await.unwrap();
    let b = f.objects.create(f.project_id, company("B"), None).await.unwrap();
    assert!(a.embedding.is_none());

    let rel = f
        .relationships
        .create(
            f.project_id,
            CreateRelationship {
                rel_type: "DEPENDS_ON".to_string(),
                src_id: a.canonical_id,
                dst_id: b.canonical_id,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    assert!(rel.embedding.is_none());
    assert!(rel.triplet_text.is_some());

    // A later backfill with a healthy provider fills the gaps
    let objects = ObjectStore::new(
        f.storage.clone(),
        registry(),
        Arc::new(MockEmbedder::new()),
    );
    let relationships = RelationshipStore::new(
        f.storage.clone(),
        objects.clone(),
        registry(),
        Arc::new(MockEmbedder::new()),
    );

    let embedded_objects = objects
        .backfill_embeddings(f.project_id, 16, None)
        .await
        .unwrap();
    assert!(embedded_objects >= 2);
    let embedded_rels = relationships
        .backfill_embeddings(f.project_id, 16, None)
        .await
        .unwrap();
    assert_eq!(embedded_rels, 1);

    let rel = f.relationships.get(f.project_id, rel.id).await.unwrap();
    assert!(rel.embedding.is_some());
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn chunk_listing_and_bulk_deletes() {
    let f = fixture().await;

    let doc_a = lattice_core::Document::new(f.project_id, "a.md", "hash-a");
    let doc_b = lattice_core::Document::new(f.project_id, "b.md", "hash-b");
    f.documents.insert(&doc_a).await.unwrap();
    f.documents.insert(&doc_b).await.unwrap();

    for i in 0..3 {
        f.chunks
            .insert(doc_a.id, i, &format!("authentication flow part {i}"), None)
            .await
            .unwrap();
    }
    f.chunks
        .insert(doc_b.id, 0, "unrelated content", None)
        .await
        .unwrap();

    let listed = f
        .chunks
        .list(
            f.project_id,
            ListChunks {
                document_id: Some(doc_a.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|c| !c.has_embedding));

    let counts = f
        .chunks
        .bulk_delete_by_documents(f.project_id, &[doc_a.id, doc_b.id])
        .await
        .unwrap();
    assert_eq!(counts[&doc_a.id], 3);
    assert_eq!(counts[&doc_b.id], 1);

    let remaining = f
        .chunks
        .list(f.project_id, ListChunks::default())
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector (set LATTICE_TEST_DSN)"]
async fn project_scoping_isolates_tenants() {
    let f = fixture().await;
    let other_project = Uuid::new_v4();

    let created = f
        .objects
        .create(f.project_id, person("Private Person"), None)
        .await
        .unwrap();

    let err = f.objects.get(other_project, created.id).await.unwrap_err();
    assert_eq!(err.code(), "not_found");

    let listed = f
        .objects
        .list(other_project, Default::default())
        .await
        .unwrap();
    assert!(listed.is_empty());
}
