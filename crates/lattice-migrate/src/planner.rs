//! Per-object migration planning.
//!
//! Pure: given an object and the from/to type schemas, compute the migrated
//! properties, what gets dropped or coerced, the risk classification, and
//! whether the gate lets it through. No storage access happens here, which
//! is what makes the decision tree testable in isolation.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use lattice_core::error::{Error, Result};
use lattice_core::schema::{CompiledSchema, PropertyKind, TypeSchema};
use lattice_core::types::{ArchiveEntry, GraphObject, Properties, RiskLevel};
use lattice_core::validate::{is_iso8601_str, validate_properties};

/// Operator-supplied gate overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationFlags {
    /// Allow RISKY migrations
    pub force: bool,
    /// Together with `force`, allow DANGEROUS migrations
    pub confirm_data_loss: bool,
    /// Do not write archive entries for dropped fields
    pub skip_archive: bool,
}

/// What the runner should do with one object.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// Write a new version with these properties (and archive entry, when
    /// fields were dropped and archiving is on)
    Apply {
        properties: Properties,
        archive_entry: Option<ArchiveEntry>,
        risk: RiskLevel,
        coercions: usize,
        dropped_fields: Vec<String>,
    },
    /// The gate refused; nothing may be written
    Blocked { risk: RiskLevel, reason: String },
    /// The row cannot be migrated validly; counted as an error, never
    /// written, regardless of flags
    Failed { issues: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ObjectPlan {
    pub object_id: Uuid,
    pub canonical_id: Uuid,
    pub outcome: PlanOutcome,
}

/// The risk decision tree, in evaluation order.
pub fn classify_risk(errors: usize, dropped: usize, coercions: usize) -> RiskLevel {
    if errors > 0 {
        RiskLevel::Dangerous
    } else if dropped >= 3 {
        RiskLevel::Dangerous
    } else if dropped >= 1 {
        RiskLevel::Risky
    } else if coercions > 0 {
        RiskLevel::Cautious
    } else {
        RiskLevel::Safe
    }
}

/// Plan the migration of one object from `from_schema` to `to_schema`.
pub fn plan_object(
    object: &GraphObject,
    from_schema: &CompiledSchema,
    to_schema: &CompiledSchema,
    flags: &MigrationFlags,
    now: DateTime<Utc>,
) -> ObjectPlan {
    let outcome = plan_outcome(object, from_schema, to_schema, flags, now);
    ObjectPlan {
        object_id: object.id,
        canonical_id: object.canonical_id,
        outcome,
    }
}

fn plan_outcome(
    object: &GraphObject,
    from_schema: &CompiledSchema,
    to_schema: &CompiledSchema,
    flags: &MigrationFlags,
    now: DateTime<Utc>,
) -> PlanOutcome {
    let Ok(to_type) = to_schema.object_type(&object.object_type) else {
        return PlanOutcome::Failed {
            issues: vec![format!(
                "type '{}' does not exist in schema version {}",
                object.object_type, to_schema.version
            )],
        };
    };
    let from_type = from_schema.object_type(&object.object_type).ok();

    let mut issues: Vec<String> = Vec::new();
    let mut coercions = 0usize;
    let mut migrated = Properties::new();

    // Destination-driven pass: carry, coerce, or flag each target field.
    for (field, to_prop) in &to_type.properties {
        match object.properties.get(field) {
            Some(value) if !value.is_null() => {
                let source_kind = declared_or_inferred_kind(from_type, field, value);
                if source_kind == to_prop.kind {
                    migrated.insert(field.clone(), value.clone());
                } else {
                    match coerce(value, source_kind, to_prop.kind) {
                        Ok(coerced) => {
                            coercions += 1;
                            migrated.insert(field.clone(), coerced);
                        }
                        Err(error) => issues.push(error.to_string()),
                    }
                }
            }
            _ => {
                if to_prop.required {
                    issues.push(format!(
                        "new required field '{field}' has no value to migrate"
                    ));
                }
            }
        }
    }

    // Source fields the destination schema does not declare are dropped.
    let mut dropped = Properties::new();
    for (field, value) in &object.properties {
        if !to_type.properties.contains_key(field) {
            dropped.insert(field.clone(), value.clone());
        }
    }

    if issues.is_empty() {
        if let Err(error) = validate_properties(to_type, &migrated) {
            issues.push(error.to_string());
        }
    }

    let dropped_fields: Vec<String> = dropped.keys().cloned().collect();
    let risk = classify_risk(issues.len(), dropped_fields.len(), coercions);

    if !issues.is_empty() {
        return PlanOutcome::Failed { issues };
    }

    let allowed = match risk {
        RiskLevel::Safe | RiskLevel::Cautious => true,
        RiskLevel::Risky => flags.force,
        RiskLevel::Dangerous => flags.force && flags.confirm_data_loss,
    };
    if !allowed {
        let reason = match risk {
            RiskLevel::Risky => format!(
                "drops {} field(s) ({}); pass --force to proceed",
                dropped_fields.len(),
                dropped_fields.join(", ")
            ),
            _ => format!(
                "drops {} field(s) ({}); pass --force --confirm-data-loss to proceed",
                dropped_fields.len(),
                dropped_fields.join(", ")
            ),
        };
        return PlanOutcome::Blocked { risk, reason };
    }

    let archive_entry = if !dropped.is_empty() && !flags.skip_archive {
        Some(ArchiveEntry {
            from_version: from_schema.version.clone(),
            to_version: to_schema.version.clone(),
            archived_at: now,
            dropped,
        })
    } else {
        None
    };

    PlanOutcome::Apply {
        properties: migrated,
        archive_entry,
        risk,
        coercions,
        dropped_fields,
    }
}

/// Prefer the declared kind from the old schema; fall back to the JSON kind
/// of the actual value for fields the old schema never declared.
fn declared_or_inferred_kind(
    from_type: Option<&TypeSchema>,
    field: &str,
    value: &Value,
) -> PropertyKind {
    if let Some(schema) = from_type {
        if let Some(prop) = schema.properties.get(field) {
            return prop.kind;
        }
    }
    match value {
        Value::String(_) => PropertyKind::String,
        Value::Number(_) => PropertyKind::Number,
        Value::Bool(_) => PropertyKind::Boolean,
        Value::Array(_) => PropertyKind::Array,
        _ => PropertyKind::Object,
    }
}

/// Strict kind coercions. Anything outside the supported pairs, or a value
/// that fails the strict parse, is an incompatible value.
fn coerce(value: &Value, from: PropertyKind, to: PropertyKind) -> Result<Value> {
    let text = value.as_str();
    match (from, to) {
        (PropertyKind::String, PropertyKind::Number) => {
            let s = text.ok_or_else(|| incompatible(value, to))?;
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| incompatible(value, to))?;
            if !parsed.is_finite() {
                return Err(incompatible(value, to));
            }
            serde_json::Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| incompatible(value, to))
        }
        (PropertyKind::String, PropertyKind::Boolean) => match text {
            Some("true") => Ok(Value::Bool(true)),
            Some("false") => Ok(Value::Bool(false)),
            _ => Err(incompatible(value, to)),
        },
        (PropertyKind::String, PropertyKind::Date) => {
            let s = text.ok_or_else(|| incompatible(value, to))?;
            if is_iso8601_str(s) {
                Ok(value.clone())
            } else {
                Err(incompatible(value, to))
            }
        }
        // Enum destinations accept strings; membership is checked by the
        // final schema validation.
        (PropertyKind::String, PropertyKind::Enum) if text.is_some() => Ok(value.clone()),
        _ => Err(Error::incompatible(
            "properties",
            format!("no coercion from {from} to {to}"),
        )),
    }
}

fn incompatible(value: &Value, to: PropertyKind) -> Error {
    Error::incompatible(
        "properties",
        format!("value {value} cannot be coerced to {to}"),
    )
}

/// Rollback planning: merge the matching archive entry back into the
/// properties and remove it from the archive. Refuses when no entry matches
/// the requested (from, to) pair; no silent guessing.
pub fn plan_rollback(
    object: &GraphObject,
    rollback_to: &str,
) -> Result<(Properties, Vec<ArchiveEntry>)> {
    let position = object
        .migration_archive
        .iter()
        .position(|entry| {
            entry.to_version == object.schema_version && entry.from_version == rollback_to
        })
        .ok_or_else(|| {
            Error::not_found(format!(
                "no archive entry for rollback {} -> {} on object {}",
                object.schema_version, rollback_to, object.canonical_id
            ))
        })?;

    let mut archive = object.migration_archive.clone();
    let entry = archive.remove(position);

    let mut properties = object.properties.clone();
    for (field, value) in entry.dropped {
        properties.insert(field, value);
    }

    Ok((properties, archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::schema::{PropertySchema, TemplatePack};
    use serde_json::json;
    use test_case::test_case;

    fn schema_v1() -> CompiledSchema {
        // Person v1: name (required string), email (string), age (string)
        let pack = TemplatePack {
            name: "people".to_string(),
            version: "1.0.0".to_string(),
            object_types: vec![TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())
                .with_property("email", PropertySchema::new(PropertyKind::String))
                .with_property("age", PropertySchema::new(PropertyKind::String))],
            relationship_types: vec![],
        };
        CompiledSchema::compile("1.0.0", &[pack]).unwrap()
    }

    fn schema_v2() -> CompiledSchema {
        // Person v2: adds optional phone, age becomes a number
        let pack = TemplatePack {
            name: "people".to_string(),
            version: "2.0.0".to_string(),
            object_types: vec![TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())
                .with_property("email", PropertySchema::new(PropertyKind::String))
                .with_property("age", PropertySchema::new(PropertyKind::Number))
                .with_property("phone", PropertySchema::new(PropertyKind::String))],
            relationship_types: vec![],
        };
        CompiledSchema::compile("2.0.0", &[pack]).unwrap()
    }

    fn schema_v3() -> CompiledSchema {
        // Person v3: drops email
        let pack = TemplatePack {
            name: "people".to_string(),
            version: "3.0.0".to_string(),
            object_types: vec![TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())
                .with_property("age", PropertySchema::new(PropertyKind::Number))],
            relationship_types: vec![],
        };
        CompiledSchema::compile("3.0.0", &[pack]).unwrap()
    }

    fn person(properties: &[(&str, Value)], schema_version: &str) -> GraphObject {
        let id = Uuid::new_v4();
        GraphObject {
            id,
            canonical_id: id,
            project_id: Uuid::new_v4(),
            object_type: "Person".to_string(),
            version: 1,
            key: None,
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            status: None,
            labels: vec![],
            actor_id: None,
            embedding: None,
            schema_version: schema_version.to_string(),
            migration_archive: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            last_accessed_at: None,
        }
    }

    #[test_case(0, 0, 0, RiskLevel::Safe ; "clean")]
    #[test_case(0, 0, 2, RiskLevel::Cautious ; "coercions only")]
    #[test_case(0, 1, 0, RiskLevel::Risky ; "one drop")]
    #[test_case(0, 2, 5, RiskLevel::Risky ; "two drops outrank coercions")]
    #[test_case(0, 3, 0, RiskLevel::Dangerous ; "three drops")]
    #[test_case(1, 0, 0, RiskLevel::Dangerous ; "any error")]
    #[test_case(2, 5, 9, RiskLevel::Dangerous ; "errors dominate")]
    fn risk_tree(errors: usize, dropped: usize, coercions: usize, expected: RiskLevel) {
        assert_eq!(classify_risk(errors, dropped, coercions), expected);
    }

    #[test]
    fn additive_change_is_safe_and_untouched() {
        let object = person(&[("name", json!("Ada"))], "1.0.0");
        let plan = plan_object(
            &object,
            &schema_v1(),
            &schema_v2(),
            &MigrationFlags::default(),
            Utc::now(),
        );

        match plan.outcome {
            PlanOutcome::Apply {
                properties,
                archive_entry,
                risk,
                coercions,
                dropped_fields,
            } => {
                assert_eq!(risk, RiskLevel::Safe);
                assert_eq!(coercions, 0);
                assert!(dropped_fields.is_empty());
                assert!(archive_entry.is_none());
                assert_eq!(properties.get("name"), Some(&json!("Ada")));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn string_to_number_coercion_is_cautious() {
        let object = person(&[("name", json!("Ada")), ("age", json!("36"))], "1.0.0");
        let plan = plan_object(
            &object,
            &schema_v1(),
            &schema_v2(),
            &MigrationFlags::default(),
            Utc::now(),
        );

        match plan.outcome {
            PlanOutcome::Apply {
                properties,
                risk,
                coercions,
                ..
            } => {
                assert_eq!(risk, RiskLevel::Cautious);
                assert_eq!(coercions, 1);
                assert_eq!(properties.get("age"), Some(&json!(36.0)));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn failed_coercion_is_an_error_even_when_forced() {
        let object = person(
            &[("name", json!("Ada")), ("age", json!("not a number"))],
            "1.0.0",
        );
        let flags = MigrationFlags {
            force: true,
            confirm_data_loss: true,
            skip_archive: false,
        };
        let plan = plan_object(&object, &schema_v1(), &schema_v2(), &flags, Utc::now());

        match plan.outcome {
            PlanOutcome::Failed { issues } => {
                assert_eq!(issues.len(), 1);
                assert!(issues[0].contains("cannot be coerced"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn dropped_field_blocks_without_force_then_archives_with_it() {
        let object = person(
            &[("name", json!("Ada")), ("email", json!("ada@example.com"))],
            "2.0.0",
        );

        // Without --force: blocked, nothing to write
        let plan = plan_object(
            &object,
            &schema_v2(),
            &schema_v3(),
            &MigrationFlags::default(),
            Utc::now(),
        );
        match plan.outcome {
            PlanOutcome::Blocked { risk, reason } => {
                assert_eq!(risk, RiskLevel::Risky);
                assert!(reason.contains("email"));
            }
            other => panic!("expected blocked, got {other:?}"),
        }

        // With --force: applied, the dropped value is archived
        let flags = MigrationFlags {
            force: true,
            ..Default::default()
        };
        let plan = plan_object(&object, &schema_v2(), &schema_v3(), &flags, Utc::now());
        match plan.outcome {
            PlanOutcome::Apply {
                properties,
                archive_entry,
                risk,
                dropped_fields,
                ..
            } => {
                assert_eq!(risk, RiskLevel::Risky);
                assert_eq!(dropped_fields, vec!["email".to_string()]);
                assert!(properties.get("email").is_none());
                let entry = archive_entry.expect("archive entry");
                assert_eq!(entry.from_version, "2.0.0");
                assert_eq!(entry.to_version, "3.0.0");
                assert_eq!(entry.dropped.get("email"), Some(&json!("ada@example.com")));
            }
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn skip_archive_suppresses_the_entry() {
        let object = person(&[("name", json!("Ada")), ("email", json!("a@b"))], "2.0.0");
        let flags = MigrationFlags {
            force: true,
            skip_archive: true,
            ..Default::default()
        };
        let plan = plan_object(&object, &schema_v2(), &schema_v3(), &flags, Utc::now());
        match plan.outcome {
            PlanOutcome::Apply { archive_entry, .. } => assert!(archive_entry.is_none()),
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn new_required_field_is_an_error() {
        let to_pack = TemplatePack {
            name: "people".to_string(),
            version: "4.0.0".to_string(),
            object_types: vec![TypeSchema::new("Person")
                .with_property("name", PropertySchema::new(PropertyKind::String).required())
                .with_property(
                    "employee_id",
                    PropertySchema::new(PropertyKind::String).required(),
                )],
            relationship_types: vec![],
        };
        let to_schema = CompiledSchema::compile("4.0.0", &[to_pack]).unwrap();

        let object = person(&[("name", json!("Ada"))], "1.0.0");
        let plan = plan_object(
            &object,
            &schema_v1(),
            &to_schema,
            &MigrationFlags::default(),
            Utc::now(),
        );
        match plan.outcome {
            PlanOutcome::Failed { issues } => {
                assert!(issues[0].contains("employee_id"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn rollback_restores_dropped_fields_exactly() {
        // Forward: drop email under force, then roll back.
        let object = person(
            &[("name", json!("Ada")), ("email", json!("ada@example.com"))],
            "2.0.0",
        );
        let flags = MigrationFlags {
            force: true,
            ..Default::default()
        };
        let plan = plan_object(&object, &schema_v2(), &schema_v3(), &flags, Utc::now());
        let (migrated_props, entry) = match plan.outcome {
            PlanOutcome::Apply {
                properties,
                archive_entry,
                ..
            } => (properties, archive_entry.unwrap()),
            other => panic!("expected apply, got {other:?}"),
        };

        let mut migrated = person(&[], "3.0.0");
        migrated.properties = migrated_props;
        migrated.migration_archive = vec![entry];

        let (restored, remaining_archive) = plan_rollback(&migrated, "2.0.0").unwrap();
        assert_eq!(restored.get("email"), Some(&json!("ada@example.com")));
        assert_eq!(restored.get("name"), Some(&json!("Ada")));
        assert!(remaining_archive.is_empty());
    }

    #[test]
    fn rollback_without_matching_entry_refuses() {
        let object = person(&[("name", json!("Ada"))], "3.0.0");
        let err = plan_rollback(&object, "2.0.0").unwrap_err();
        assert_eq!(err.code(), "not_found");

        // An entry for a different pair does not match either.
        let mut with_other = person(&[("name", json!("Ada"))], "3.0.0");
        with_other.migration_archive = vec![ArchiveEntry {
            from_version: "1.0.0".to_string(),
            to_version: "2.0.0".to_string(),
            archived_at: Utc::now(),
            dropped: Properties::new(),
        }];
        assert!(plan_rollback(&with_other, "2.0.0").is_err());
    }

    #[test]
    fn type_missing_from_target_schema_fails() {
        let empty = CompiledSchema::compile("9.0.0", &[]).unwrap();
        let object = person(&[("name", json!("Ada"))], "1.0.0");
        let plan = plan_object(
            &object,
            &schema_v1(),
            &empty,
            &MigrationFlags::default(),
            Utc::now(),
        );
        assert!(matches!(plan.outcome, PlanOutcome::Failed { .. }));
    }
}
