//! Versioned graph entities and their lifecycle helpers.
//!
//! Objects and relationships share the same versioning scheme: every edit
//! inserts a new row, `canonical_id` ties the chain together, and the row
//! with the greatest version and `deleted_at IS NULL` is the active one.
//! Historical rows are never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// JSON property bag validated against the type schema at the boundaries.
pub type Properties = serde_json::Map<String, Value>;

/// A typed, versioned entity with validated JSON properties and an optional
/// embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphObject {
    /// Version identity, unique per row
    pub id: Uuid,
    /// Stable identity across versions; equals `id` of version 1
    pub canonical_id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub object_type: String,
    /// Monotone, contiguous from 1 per canonical id
    pub version: i32,
    /// Optional human slug, unique per (project, type) among active rows
    pub key: Option<String>,
    pub properties: Properties,
    pub status: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub schema_version: String,
    #[serde(default)]
    pub migration_archive: Vec<ArchiveEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Non-null marks this row as superseded or tombstoned
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl GraphObject {
    /// Human-facing display string: `properties.name` when it is a non-empty
    /// string, else the key, else the id.
    pub fn display_name(&self) -> String {
        if let Some(Value::String(name)) = self.properties.get("name") {
            if !name.is_empty() {
                return name.clone();
            }
        }
        match &self.key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => self.id.to_string(),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A typed, versioned directed edge between two graph objects.
///
/// `src_id` and `dst_id` refer to object canonical ids, so edges survive
/// endpoint versioning. The triplet text and its embedding are optional
/// enrichments attached at create/patch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub id: Uuid,
    pub canonical_id: Uuid,
    pub project_id: Uuid,
    pub src_id: Uuid,
    pub dst_id: Uuid,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub version: i32,
    pub properties: Properties,
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
    /// The natural-language form that was (or would be) embedded
    pub triplet_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GraphRelationship {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Lowercase a relationship type name and replace underscores with spaces:
/// `WORKS_FOR` becomes `works for`.
pub fn humanize_relationship_type(rel_type: &str) -> String {
    rel_type.replace('_', " ").to_lowercase()
}

/// Build the triplet text embedded for relationship vector search:
/// `"{src display} {humanized type} {dst display}"`.
pub fn triplet_text(src: &GraphObject, rel_type: &str, dst: &GraphObject) -> String {
    format!(
        "{} {} {}",
        src.display_name(),
        humanize_relationship_type(rel_type),
        dst.display_name()
    )
}

/// Document metadata; mostly owned by the external ingestion pipeline and
/// referenced here for chunk scoping and deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    /// Dedup key over the extracted content
    pub content_hash: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub source_type: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        project_id: Uuid,
        filename: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Document {
            id: Uuid::new_v4(),
            project_id,
            filename: filename.into(),
            content_hash: content_hash.into(),
            size: 0,
            mime_type: None,
            source_type: None,
            parent_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Text fragment of a document, candidate for text-side retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Derived observability flag
    pub has_embedding: bool,
}

/// One archived migration step, co-located with the row so it rolls back
/// atomically with the row version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub from_version: String,
    pub to_version: String,
    pub archived_at: DateTime<Utc>,
    /// Field name to dropped value
    pub dropped: Properties,
}

/// Risk classification assigned to a migration outcome per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Cautious,
    Risky,
    Dangerous,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Cautious => "cautious",
            RiskLevel::Risky => "risky",
            RiskLevel::Dangerous => "dangerous",
        };
        f.write_str(s)
    }
}

/// Per-run outcome counters for a migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationCounts {
    pub safe: u64,
    pub cautious: u64,
    pub risky: u64,
    pub dangerous: u64,
    pub blocked: u64,
    pub errors: u64,
}

impl MigrationCounts {
    pub fn total(&self) -> u64 {
        self.safe + self.cautious + self.risky + self.dangerous + self.blocked + self.errors
    }

    /// Highest risk level observed across the run, for the audit row.
    pub fn max_risk(&self) -> RiskLevel {
        if self.dangerous > 0 || self.errors > 0 {
            RiskLevel::Dangerous
        } else if self.risky > 0 {
            RiskLevel::Risky
        } else if self.cautious > 0 {
            RiskLevel::Cautious
        } else {
            RiskLevel::Safe
        }
    }
}

/// Terminal status of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Audit row for one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMigrationRun {
    pub id: Uuid,
    pub project_id: Uuid,
    pub from_version: String,
    pub to_version: String,
    pub risk_level: RiskLevel,
    pub counts: MigrationCounts,
    pub dry_run: bool,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object_with(properties: Properties, key: Option<&str>) -> GraphObject {
        let id = Uuid::new_v4();
        GraphObject {
            id,
            canonical_id: id,
            project_id: Uuid::new_v4(),
            object_type: "Person".to_string(),
            version: 1,
            key: key.map(String::from),
            properties,
            status: None,
            labels: vec![],
            actor_id: None,
            embedding: None,
            schema_version: "1.0.0".to_string(),
            migration_archive: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            last_accessed_at: None,
        }
    }

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn display_name_prefers_name_property() {
        let obj = object_with(props(&[("name", json!("Elon Musk"))]), Some("elon"));
        assert_eq!(obj.display_name(), "Elon Musk");
    }

    #[test]
    fn display_name_falls_back_to_key_then_id() {
        let keyed = object_with(props(&[("name", json!(""))]), Some("elon"));
        assert_eq!(keyed.display_name(), "elon");

        let bare = object_with(Properties::new(), None);
        assert_eq!(bare.display_name(), bare.id.to_string());
    }

    #[test]
    fn display_name_ignores_non_string_name() {
        let obj = object_with(props(&[("name", json!(42))]), Some("the-key"));
        assert_eq!(obj.display_name(), "the-key");
    }

    #[test]
    fn humanize_lowercases_and_replaces_underscores() {
        assert_eq!(humanize_relationship_type("WORKS_FOR"), "works for");
        assert_eq!(humanize_relationship_type("FOUNDED"), "founded");
        assert_eq!(humanize_relationship_type("DEPENDS_ON"), "depends on");
    }

    #[test]
    fn triplet_text_composes_display_and_humanized_type() {
        let src = object_with(props(&[("name", json!("Elon Musk"))]), None);
        let dst = object_with(props(&[("name", json!("Tesla"))]), None);
        assert_eq!(triplet_text(&src, "FOUNDED", &dst), "Elon Musk founded Tesla");
    }

    #[test]
    fn max_risk_escalates_on_errors() {
        let counts = MigrationCounts {
            safe: 10,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(counts.max_risk(), RiskLevel::Dangerous);
        assert_eq!(counts.total(), 11);
    }

    #[test]
    fn risk_level_ordering_matches_severity() {
        assert!(RiskLevel::Safe < RiskLevel::Cautious);
        assert!(RiskLevel::Cautious < RiskLevel::Risky);
        assert!(RiskLevel::Risky < RiskLevel::Dangerous);
    }

    #[test]
    fn object_serializes_type_field() {
        let obj = object_with(Properties::new(), None);
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["type"], json!("Person"));
        assert!(value.get("object_type").is_none());
    }
}
