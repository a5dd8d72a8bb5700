//! Property validation against registered type schemas.
//!
//! Enforced at create and patch: required properties present and non-null,
//! kind checks with per-kind constraints (regex pattern, numeric bounds,
//! enum membership, ISO-8601 dates), and unknown-property rejection when a
//! schema closes `additional_properties`. Failures carry the offending field
//! path so callers can surface it unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{PropertyKind, PropertySchema, RelationshipTypeSchema, TypeSchema};
use crate::types::Properties;

/// Validate an object property payload against its type schema.
pub fn validate_properties(schema: &TypeSchema, properties: &Properties) -> Result<()> {
    validate_property_map(
        &schema.properties,
        schema.additional_properties,
        properties,
    )
}

/// Validate relationship endpoints and properties against the edge schema.
pub fn validate_relationship(
    schema: &RelationshipTypeSchema,
    source_type: &str,
    target_type: &str,
    properties: &Properties,
) -> Result<()> {
    if !schema.allows(source_type, target_type) {
        return Err(Error::validation(
            "type",
            format!(
                "relationship '{}' does not permit endpoints ({source_type} -> {target_type})",
                schema.name
            ),
        ));
    }
    validate_property_map(&schema.properties, true, properties)
}

/// Shallow-merge a patch delta onto existing properties. An explicit `null`
/// in the delta removes the key. Returns the merged map and the names of the
/// fields the delta actually changed.
pub fn merge_properties(base: &Properties, delta: &Properties) -> (Properties, Vec<String>) {
    let mut merged = base.clone();
    let mut changed = Vec::new();

    for (key, value) in delta {
        if value.is_null() {
            if merged.remove(key).is_some() {
                changed.push(key.clone());
            }
        } else if merged.get(key) != Some(value) {
            merged.insert(key.clone(), value.clone());
            changed.push(key.clone());
        }
    }

    (merged, changed)
}

fn validate_property_map(
    schemas: &BTreeMap<String, PropertySchema>,
    additional_properties: bool,
    properties: &Properties,
) -> Result<()> {
    for (name, prop_schema) in schemas {
        match properties.get(name) {
            None | Some(Value::Null) => {
                if prop_schema.required {
                    return Err(Error::validation(
                        format!("properties.{name}"),
                        "required property is missing or null",
                    ));
                }
            }
            Some(value) => validate_value(name, prop_schema, value)?,
        }
    }

    if !additional_properties {
        for key in properties.keys() {
            if !schemas.contains_key(key) {
                return Err(Error::validation(
                    format!("properties.{key}"),
                    "unknown property not permitted by schema",
                ));
            }
        }
    }

    Ok(())
}

fn validate_value(name: &str, schema: &PropertySchema, value: &Value) -> Result<()> {
    let field = format!("properties.{name}");

    match schema.kind {
        PropertyKind::String => {
            let Some(s) = value.as_str() else {
                return Err(kind_mismatch(&field, "string", value));
            };
            if let Some(pattern) = &schema.pattern {
                let re = regex::Regex::new(pattern).map_err(|e| {
                    Error::validation(&field, format!("schema pattern does not compile: {e}"))
                })?;
                if !re.is_match(s) {
                    return Err(Error::validation(
                        &field,
                        format!("value does not match pattern '{pattern}'"),
                    ));
                }
            }
        }
        PropertyKind::Number => {
            let Some(n) = value.as_f64() else {
                return Err(kind_mismatch(&field, "number", value));
            };
            if let Some(min) = schema.min {
                if n < min {
                    return Err(Error::validation(&field, format!("{n} is below minimum {min}")));
                }
            }
            if let Some(max) = schema.max {
                if n > max {
                    return Err(Error::validation(&field, format!("{n} is above maximum {max}")));
                }
            }
        }
        PropertyKind::Boolean => {
            if !value.is_boolean() {
                return Err(kind_mismatch(&field, "boolean", value));
            }
        }
        PropertyKind::Date => {
            let Some(s) = value.as_str() else {
                return Err(kind_mismatch(&field, "date", value));
            };
            if !is_iso8601_str(s) {
                return Err(Error::validation(
                    &field,
                    format!("'{s}' is not an ISO-8601 date"),
                ));
            }
        }
        PropertyKind::Enum => {
            let Some(s) = value.as_str() else {
                return Err(kind_mismatch(&field, "enum", value));
            };
            let allowed = schema.values.as_deref().unwrap_or(&[]);
            if !allowed.iter().any(|v| v == s) {
                return Err(Error::validation(
                    &field,
                    format!("'{s}' is not one of {allowed:?}"),
                ));
            }
        }
        PropertyKind::Object => {
            if !value.is_object() {
                return Err(kind_mismatch(&field, "object", value));
            }
        }
        PropertyKind::Array => {
            if !value.is_array() {
                return Err(kind_mismatch(&field, "array", value));
            }
        }
    }

    Ok(())
}

fn kind_mismatch(field: &str, expected: &str, value: &Value) -> Error {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Error::validation(field, format!("expected {expected}, got {actual}"))
}

/// Accept RFC 3339 timestamps and plain `YYYY-MM-DD` dates.
pub fn is_iso8601_str(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok() || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
