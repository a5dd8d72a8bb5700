//! Shared command setup: config, storage, schema registry, stores.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use lattice_config::LatticeConfig;
use lattice_core::schema::{CompiledSchema, SchemaRegistry, TemplatePack};
use lattice_core::traits::EmbeddingProvider;
use lattice_embed::HttpEmbeddingClient;
use lattice_postgres::{ObjectStore, RelationshipStore, Storage};

/// On-disk schema catalog: every known schema version with the template
/// packs installed at that version.
#[derive(Debug, Deserialize)]
pub struct SchemaCatalogFile {
    pub current: String,
    pub versions: Vec<SchemaVersionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaVersionEntry {
    pub version: String,
    pub packs: Vec<TemplatePack>,
}

pub fn load_registry(path: &Path) -> Result<SchemaRegistry> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schema catalog {}", path.display()))?;
    let catalog: SchemaCatalogFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse schema catalog {}", path.display()))?;

    let mut registry: Option<SchemaRegistry> = None;
    for entry in &catalog.versions {
        let compiled = CompiledSchema::compile(&entry.version, &entry.packs)
            .with_context(|| format!("schema version {} does not compile", entry.version))?;
        match &mut registry {
            None => registry = Some(SchemaRegistry::new(compiled)),
            Some(registry) => registry.insert(compiled),
        }
    }

    let mut registry =
        registry.with_context(|| "schema catalog declares no versions".to_string())?;
    registry
        .set_current(&catalog.current)
        .with_context(|| format!("current version '{}' is not declared", catalog.current))?;
    Ok(registry)
}

/// Everything a command needs to talk to the engine.
pub struct EngineHandles {
    pub storage: Storage,
    pub objects: ObjectStore,
    pub relationships: RelationshipStore,
}

pub async fn connect(config: &LatticeConfig, registry: SchemaRegistry) -> Result<EngineHandles> {
    let storage = Storage::connect(&config.storage)
        .await
        .context("failed to connect to storage")?;
    storage
        .ensure_schema()
        .await
        .context("failed to apply storage bootstrap DDL")?;

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        HttpEmbeddingClient::new(config.embedding.clone())
            .context("failed to build embedding client")?,
    );
    let registry = Arc::new(registry);

    let objects = ObjectStore::new(storage.clone(), registry.clone(), embedder.clone());
    let relationships =
        RelationshipStore::new(storage.clone(), objects.clone(), registry, embedder);

    info!("engine handles ready");
    Ok(EngineHandles {
        storage,
        objects,
        relationships,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn catalog_file_round_trips_into_a_registry() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "current": "2.0.0",
                "versions": [
                    {{
                        "version": "1.0.0",
                        "packs": [{{
                            "name": "base",
                            "version": "1.0.0",
                            "object_types": [{{
                                "name": "Person",
                                "properties": {{
                                    "name": {{ "kind": "string", "required": true }}
                                }}
                            }}],
                            "relationship_types": []
                        }}]
                    }},
                    {{
                        "version": "2.0.0",
                        "packs": [{{
                            "name": "base",
                            "version": "2.0.0",
                            "object_types": [{{
                                "name": "Person",
                                "properties": {{
                                    "name": {{ "kind": "string", "required": true }},
                                    "email": {{ "kind": "string" }}
                                }}
                            }}],
                            "relationship_types": []
                        }}]
                    }}
                ]
            }}"#
        )
        .unwrap();

        let registry = load_registry(file.path()).unwrap();
        assert_eq!(registry.current_version(), "2.0.0");
        assert!(registry.at("1.0.0").is_ok());
        assert!(registry
            .at("2.0.0")
            .unwrap()
            .object_type("Person")
            .unwrap()
            .properties
            .contains_key("email"));
    }

    #[test]
    fn unknown_current_version_is_refused() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "current": "9.9.9", "versions": [{{ "version": "1.0.0", "packs": [] }}] }}"#
        )
        .unwrap();
        assert!(load_registry(file.path()).is_err());
    }
}
