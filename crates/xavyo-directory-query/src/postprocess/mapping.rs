//! Display field mapping.

use chrono::Local;
use serde_json::Value;
use std::collections::BTreeMap;

use super::lookup;
use crate::adapter::Row;
use crate::definition::{FieldMapping, FieldTransform};
use crate::time;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rename mapped fields, apply their display transforms and drop hidden ones.
///
/// Unmapped fields are kept under their raw name, in their original position.
#[must_use]
pub fn apply_field_mappings(rows: Vec<Row>, mappings: &BTreeMap<String, FieldMapping>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            let mut out = Row::with_capacity(row.len());
            for (field, value) in row {
                match mappings.get(&field) {
                    Some(mapping) if mapping.hide => {}
                    Some(mapping) => {
                        let value = match &mapping.transform {
                            Some(transform) => {
                                apply_transform(transform, mapping.format.as_deref(), value)
                            }
                            None => value,
                        };
                        out.insert(mapping.display_name.clone(), value);
                    }
                    None => {
                        out.insert(field, value);
                    }
                }
            }
            out
        })
        .collect()
}

fn apply_transform(transform: &FieldTransform, format: Option<&str>, value: Value) -> Value {
    match transform {
        FieldTransform::DateToLocal => date_to_local(value, format),
        FieldTransform::BooleanToYesNo => boolean_to_yes_no(value),
        FieldTransform::ArrayToString => array_to_string(value),
        FieldTransform::ExtractProperty { path } => extract_property(value, path),
    }
}

fn date_to_local(value: Value, format: Option<&str>) -> Value {
    let parsed = match &value {
        Value::String(s) => time::parse_any_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(time::from_file_time),
        _ => None,
    };
    match parsed {
        Some(instant) => Value::String(
            instant
                .with_timezone(&Local)
                .format(format.unwrap_or(DEFAULT_DATE_FORMAT))
                .to_string(),
        ),
        None => value,
    }
}

fn boolean_to_yes_no(value: Value) -> Value {
    let flag = match &value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    };
    match flag {
        Some(true) => Value::String("Yes".to_string()),
        Some(false) => Value::String("No".to_string()),
        None => value,
    }
}

fn array_to_string(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::String(
            items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => other,
    }
}

fn extract_property(value: Value, path: &str) -> Value {
    match value {
        Value::Object(map) => lookup(&map, path).cloned().unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| extract_property(item, path))
                .collect(),
        ),
        other => other,
    }
}
