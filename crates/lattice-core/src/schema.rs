//! Project schema registry.
//!
//! Installed template packs compile into an effective per-project schema: a
//! mapping from object type name to [`TypeSchema`] and relationship type name
//! to [`RelationshipTypeSchema`]. Compilation is deterministic and name
//! collisions between packs are install-time errors, never silent overrides.
//! Compiled schemas are immutable once referenced; new schema versions
//! supersede rather than mutate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Properties;

/// Property fields used for the embedding projection when a type schema does
/// not name its own.
pub const DEFAULT_EMBEDDING_FIELDS: &[&str] = &["name", "title", "description", "summary", "content"];

/// Kind of a schema property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Date,
    Enum,
    Object,
    Array,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PropertyKind::String => "string",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Date => "date",
            PropertyKind::Enum => "enum",
            PropertyKind::Object => "object",
            PropertyKind::Array => "array",
        };
        f.write_str(s)
    }
}

/// Constraints for a single property of an object or relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Regex constraint, string kind only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Permitted values, enum kind only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    /// Inclusive bounds, number kind only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PropertySchema {
    pub fn new(kind: PropertyKind) -> Self {
        PropertySchema {
            kind,
            required: false,
            description: None,
            pattern: None,
            values: None,
            min: None,
            max: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Schema for one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    /// When false, properties not named in the schema are rejected
    #[serde(default = "default_true")]
    pub additional_properties: bool,
    /// Ordered property names whose values compose the embedding text
    #[serde(default)]
    pub embedding_fields: Vec<String>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        TypeSchema {
            name: name.into(),
            description: None,
            properties: BTreeMap::new(),
            additional_properties: true,
            embedding_fields: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Join the embedding-projection fields of `properties` into the text
    /// that gets embedded. Returns `None` when no projected field holds a
    /// non-empty string, in which case the object stores a NULL embedding.
    pub fn embedding_projection(&self, properties: &Properties) -> Option<String> {
        let fields: Vec<&str> = if self.embedding_fields.is_empty() {
            DEFAULT_EMBEDDING_FIELDS.to_vec()
        } else {
            self.embedding_fields.iter().map(String::as_str).collect()
        };

        let parts: Vec<&str> = fields
            .iter()
            .filter_map(|field| properties.get(*field).and_then(|v| v.as_str()))
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(". "))
        }
    }

    /// Whether a patch delta touches any field of the embedding projection.
    pub fn projection_touched(&self, changed_fields: &[String]) -> bool {
        let fields: Vec<&str> = if self.embedding_fields.is_empty() {
            DEFAULT_EMBEDDING_FIELDS.to_vec()
        } else {
            self.embedding_fields.iter().map(String::as_str).collect()
        };
        changed_fields.iter().any(|f| fields.contains(&f.as_str()))
    }
}

/// One allowed (source type, target type) pair for a relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    pub source_type: String,
    pub target_type: String,
}

/// Schema for one relationship type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTypeSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed endpoint pairs; empty means unrestricted
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
}

impl RelationshipTypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        RelationshipTypeSchema {
            name: name.into(),
            description: None,
            endpoints: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_endpoints(mut self, source_type: &str, target_type: &str) -> Self {
        self.endpoints.push(EndpointRule {
            source_type: source_type.to_string(),
            target_type: target_type.to_string(),
        });
        self
    }

    /// Whether this relationship type permits the given endpoint object types.
    pub fn allows(&self, source_type: &str, target_type: &str) -> bool {
        self.endpoints.is_empty()
            || self
                .endpoints
                .iter()
                .any(|rule| rule.source_type == source_type && rule.target_type == target_type)
    }
}

/// An installable bundle of type definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatePack {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub object_types: Vec<TypeSchema>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipTypeSchema>,
}

/// The effective project schema at one schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSchema {
    pub version: String,
    pub object_types: BTreeMap<String, TypeSchema>,
    pub relationship_types: BTreeMap<String, RelationshipTypeSchema>,
}

impl CompiledSchema {
    /// Compile installed packs into an effective schema. Deterministic: packs
    /// are folded in install order and a type name served by two packs is a
    /// conflict, not an override.
    pub fn compile(version: impl Into<String>, packs: &[TemplatePack]) -> Result<Self> {
        let mut object_types = BTreeMap::new();
        let mut relationship_types = BTreeMap::new();

        for pack in packs {
            for schema in &pack.object_types {
                if object_types.contains_key(&schema.name) {
                    return Err(Error::conflict(format!(
                        "object type '{}' defined by more than one installed pack (second: '{}')",
                        schema.name, pack.name
                    )));
                }
                object_types.insert(schema.name.clone(), schema.clone());
            }
            for schema in &pack.relationship_types {
                if relationship_types.contains_key(&schema.name) {
                    return Err(Error::conflict(format!(
                        "relationship type '{}' defined by more than one installed pack (second: '{}')",
                        schema.name, pack.name
                    )));
                }
                relationship_types.insert(schema.name.clone(), schema.clone());
            }
        }

        Ok(CompiledSchema {
            version: version.into(),
            object_types,
            relationship_types,
        })
    }

    pub fn object_type(&self, name: &str) -> Result<&TypeSchema> {
        self.object_types
            .get(name)
            .ok_or_else(|| Error::validation("type", format!("unknown object type '{name}'")))
    }

    pub fn relationship_type(&self, name: &str) -> Result<&RelationshipTypeSchema> {
        self.relationship_types
            .get(name)
            .ok_or_else(|| Error::validation("type", format!("unknown relationship type '{name}'")))
    }
}

/// Registry of compiled schemas keyed by schema version string, with one
/// version marked current for new writes.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    versions: BTreeMap<String, CompiledSchema>,
    current: String,
}

impl SchemaRegistry {
    pub fn new(current: CompiledSchema) -> Self {
        let current_version = current.version.clone();
        let mut versions = BTreeMap::new();
        versions.insert(current_version.clone(), current);
        SchemaRegistry {
            versions,
            current: current_version,
        }
    }

    /// Register a historical or upcoming schema version.
    pub fn insert(&mut self, schema: CompiledSchema) {
        self.versions.insert(schema.version.clone(), schema);
    }

    /// Promote a registered version to current. Unknown versions are refused.
    pub fn set_current(&mut self, version: &str) -> Result<()> {
        if !self.versions.contains_key(version) {
            return Err(Error::not_found(format!("schema version '{version}'")));
        }
        self.current = version.to_string();
        Ok(())
    }

    pub fn current(&self) -> &CompiledSchema {
        // The constructor guarantees the current version is registered.
        &self.versions[&self.current]
    }

    pub fn current_version(&self) -> &str {
        &self.current
    }

    pub fn at(&self, version: &str) -> Result<&CompiledSchema> {
        self.versions
            .get(version)
            .ok_or_else(|| Error::not_found(format!("schema version '{version}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_pack() -> TemplatePack {
        TemplatePack {
            name: "people".to_string(),
            version: "1.0.0".to_string(),
            object_types: vec![TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())],
            relationship_types: vec![
                RelationshipTypeSchema::new("WORKS_FOR").with_endpoints("Person", "Company")
            ],
        }
    }

    #[test]
    fn compile_collision_is_a_conflict() {
        let packs = vec![person_pack(), person_pack()];
        let err = CompiledSchema::compile("1.0.0", &packs).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn compile_then_lookup() {
        let compiled = CompiledSchema::compile("1.0.0", &[person_pack()]).unwrap();
        assert!(compiled.object_type("Person").is_ok());
        assert_eq!(
            compiled.object_type("Robot").unwrap_err().code(),
            "validation_error"
        );
    }

    #[test]
    fn endpoint_rules_restrict_unless_empty() {
        let compiled = CompiledSchema::compile("1.0.0", &[person_pack()]).unwrap();
        let works_for = compiled.relationship_type("WORKS_FOR").unwrap();
        assert!(works_for.allows("Person", "Company"));
        assert!(!works_for.allows("Company", "Person"));

        let open = RelationshipTypeSchema::new("RELATES_TO");
        assert!(open.allows("Anything", "Else"));
    }

    #[test]
    fn embedding_projection_uses_declared_fields_in_order() {
        let mut schema = TypeSchema::new("Requirement");
        schema.embedding_fields = vec!["title".to_string(), "body".to_string()];

        let mut props = Properties::new();
        props.insert("body".to_string(), json!("The body text"));
        props.insert("title".to_string(), json!("Login flow"));
        props.insert("name".to_string(), json!("ignored"));

        assert_eq!(
            schema.embedding_projection(&props),
            Some("Login flow. The body text".to_string())
        );
    }

    #[test]
    fn embedding_projection_defaults_and_empty() {
        let schema = TypeSchema::new("Person");
        let mut props = Properties::new();
        props.insert("name".to_string(), json!("Ada"));
        assert_eq!(schema.embedding_projection(&props), Some("Ada".to_string()));

        let no_text = Properties::new();
        assert_eq!(schema.embedding_projection(&no_text), None);
    }

    #[test]
    fn projection_touched_detects_relevant_delta() {
        let schema = TypeSchema::new("Person");
        assert!(schema.projection_touched(&["name".to_string()]));
        assert!(!schema.projection_touched(&["age".to_string()]));
    }

    #[test]
    fn registry_tracks_versions() {
        let v1 = CompiledSchema::compile("1.0.0", &[person_pack()]).unwrap();
        let mut v2_pack = person_pack();
        v2_pack.version = "2.0.0".to_string();
        let v2 = CompiledSchema::compile("2.0.0", &[v2_pack]).unwrap();

        let mut registry = SchemaRegistry::new(v1);
        registry.insert(v2);
        assert_eq!(registry.current_version(), "1.0.0");
        registry.set_current("2.0.0").unwrap();
        assert_eq!(registry.current_version(), "2.0.0");
        assert!(registry.at("1.0.0").is_ok());
        assert_eq!(registry.at("9.9.9").unwrap_err().code(), "not_found");
    }
}
