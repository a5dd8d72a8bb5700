//! The fixed tool catalog exposed to agents.
//!
//! Every tool is described by a name, a one-line description, and a JSON
//! Schema for its arguments. The registry validates arguments against the
//! schema before any handler runs; the schemas here are the wire contract.

use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn uuid_schema() -> Value {
    json!({ "type": "string", "format": "uuid" })
}

fn base_object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// The full catalog. Order is stable; the registry indexes by name.
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        // Entity CRUD
        ToolDefinition {
            name: "create_entity",
            description: "Create a typed graph entity with schema-validated properties",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "type": { "type": "string", "minLength": 1 },
                    "properties": { "type": "object" },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "key": { "type": "string" },
                    "status": { "type": "string" }
                }),
                &["project_id", "type", "properties"],
            ),
        },
        ToolDefinition {
            name: "get_entity",
            description: "Fetch one entity version by id",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "list_entities",
            description: "List active entities with optional type, status, and label filters",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "type": { "type": "string" },
                    "status": { "type": "string" },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200 },
                    "offset": { "type": "integer", "minimum": 0 }
                }),
                &["project_id"],
            ),
        },
        ToolDefinition {
            name: "patch_entity",
            description: "Apply a shallow property/status/label patch, producing a new version",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "id": uuid_schema(),
                    "properties": { "type": "object" },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "status": { "type": "string" }
                }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "delete_entity",
            description: "Tombstone the active version of an entity",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "restore_entity",
            description: "Restore a tombstoned entity as a new active version",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "entity_history",
            description: "Full version chain of an entity, newest first",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "canonical_id": uuid_schema() }),
                &["project_id", "canonical_id"],
            ),
        },
        ToolDefinition {
            name: "entity_edges",
            description: "Active relationships touching an entity, split by direction",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "canonical_id": uuid_schema() }),
                &["project_id", "canonical_id"],
            ),
        },
        // Relationship CRUD
        ToolDefinition {
            name: "create_relationship",
            description: "Create a typed edge between two active entities (idempotent)",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "type": { "type": "string", "minLength": 1 },
                    "src_id": uuid_schema(),
                    "dst_id": uuid_schema(),
                    "properties": { "type": "object" },
                    "weight": { "type": "number" }
                }),
                &["project_id", "type", "src_id", "dst_id"],
            ),
        },
        ToolDefinition {
            name: "get_relationship",
            description: "Fetch one relationship version by id",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "list_relationships",
            description: "List active relationships with optional type and endpoint filters",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "type": { "type": "string" },
                    "src_id": uuid_schema(),
                    "dst_id": uuid_schema(),
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200 },
                    "offset": { "type": "integer", "minimum": 0 }
                }),
                &["project_id"],
            ),
        },
        ToolDefinition {
            name: "patch_relationship",
            description: "Patch relationship properties/weight, producing a new version",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "id": uuid_schema(),
                    "properties": { "type": "object" },
                    "weight": { "type": "number" }
                }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "delete_relationship",
            description: "Tombstone the active version of a relationship",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "restore_relationship",
            description: "Restore a tombstoned relationship as a new active version",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "relationship_history",
            description: "Full version chain of a relationship, newest first",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "canonical_id": uuid_schema() }),
                &["project_id", "canonical_id"],
            ),
        },
        // Search
        ToolDefinition {
            name: "search_fts",
            description: "Lexical full-text search over graph entities",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "query": { "type": "string", "minLength": 1, "maxLength": 800 },
                    "types": { "type": "array", "items": { "type": "string" } },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 }
                }),
                &["project_id", "query"],
            ),
        },
        ToolDefinition {
            name: "search_vector",
            description: "Semantic vector search over graph entities",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "query": { "type": "string", "minLength": 1, "maxLength": 800 },
                    "types": { "type": "array", "items": { "type": "string" } },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                    "max_distance": { "type": "number", "minimum": 0, "maximum": 2 }
                }),
                &["project_id", "query"],
            ),
        },
        ToolDefinition {
            name: "search_hybrid",
            description: "Combined lexical + vector search over graph entities",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "query": { "type": "string", "minLength": 1, "maxLength": 800 },
                    "types": { "type": "array", "items": { "type": "string" } },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 }
                }),
                &["project_id", "query"],
            ),
        },
        ToolDefinition {
            name: "search_unified",
            description: "Unified search across entities, relationships, and text chunks",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "query": { "type": "string", "minLength": 1, "maxLength": 800 },
                    "resultTypes": { "enum": ["both", "graph", "text"] },
                    "graphTypes": { "type": "array", "items": { "type": "string" } },
                    "relationshipTypes": { "type": "array", "items": { "type": "string" } },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                    "fusionStrategy": {
                        "enum": ["weighted", "rrf", "interleave", "graph_first", "text_first"]
                    },
                    "weights": {
                        "type": "object",
                        "properties": {
                            "graphWeight": { "type": "number", "minimum": 0 },
                            "textWeight": { "type": "number", "minimum": 0 }
                        },
                        "additionalProperties": false
                    },
                    "includeDebug": { "type": "boolean" }
                }),
                &["project_id", "query"],
            ),
        },
        // Traversal
        ToolDefinition {
            name: "graph_traverse",
            description: "Breadth-first traversal over active relationships from a seed entity",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "seed_id": uuid_schema(),
                    "max_hops": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "direction": { "enum": ["outgoing", "incoming", "both"] }
                }),
                &["project_id", "seed_id"],
            ),
        },
        // Chunks
        ToolDefinition {
            name: "list_chunks",
            description: "List document chunks, optionally for one document",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "document_id": uuid_schema(),
                    "limit": { "type": "integer", "minimum": 1, "maximum": 200 },
                    "offset": { "type": "integer", "minimum": 0 }
                }),
                &["project_id"],
            ),
        },
        ToolDefinition {
            name: "delete_chunk",
            description: "Delete one document chunk",
            input_schema: base_object(
                json!({ "project_id": uuid_schema(), "id": uuid_schema() }),
                &["project_id", "id"],
            ),
        },
        ToolDefinition {
            name: "delete_chunks_by_document",
            description: "Delete every chunk of one or more documents, returning counts",
            input_schema: base_object(
                json!({
                    "project_id": uuid_schema(),
                    "document_ids": {
                        "type": "array",
                        "items": uuid_schema(),
                        "minItems": 1
                    }
                }),
                &["project_id", "document_ids"],
            ),
        },
        // Observability
        ToolDefinition {
            name: "get_stats",
            description: "Row counts per storage table",
            input_schema: base_object(json!({}), &[]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_names_are_unique_and_schemas_compile() {
        let catalog = catalog();
        let names: HashSet<&str> = catalog.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), catalog.len());

        for tool in &catalog {
            jsonschema::validator_for(&tool.input_schema)
                .unwrap_or_else(|e| panic!("schema for '{}' does not compile: {e}", tool.name));
        }
    }

    #[test]
    fn catalog_covers_the_operation_contract() {
        let names: HashSet<&str> = catalog().iter().map(|t| t.name).collect();
        for required in [
            "create_entity",
            "get_entity",
            "list_entities",
            "patch_entity",
            "delete_entity",
            "restore_entity",
            "entity_history",
            "entity_edges",
            "create_relationship",
            "get_relationship",
            "list_relationships",
            "patch_relationship",
            "delete_relationship",
            "restore_relationship",
            "relationship_history",
            "search_fts",
            "search_vector",
            "search_hybrid",
            "search_unified",
            "graph_traverse",
        ] {
            assert!(names.contains(required), "missing tool '{required}'");
        }
    }
}
