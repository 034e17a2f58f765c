//! Client-side row predicates.

use serde_json::Value;
use std::cmp::Ordering;

use super::lookup;
use crate::adapter::Row;
use crate::definition::{ClientFilter, FilterOperator};
use crate::error::{QueryError, QueryResult};
use crate::filter::{placeholders, sole_placeholder};
use crate::params::ResolvedParameters;

/// Keep the rows matching every predicate.
pub fn apply_client_filters(
    rows: Vec<Row>,
    filters: &[ClientFilter],
    params: &ResolvedParameters,
) -> QueryResult<Vec<Row>> {
    let resolved = filters
        .iter()
        .map(|f| -> QueryResult<_> { Ok((f, resolve_value(&f.value, params)?)) })
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(rows
        .into_iter()
        .filter(|row| {
            resolved.iter().all(|(filter, expected)| {
                let actual = lookup(row, &filter.field).unwrap_or(&Value::Null);
                matches(filter.operator, actual, expected)
            })
        })
        .collect())
}

/// Substitute parameter references in a predicate value.
///
/// A value that is exactly one placeholder takes the parameter's typed
/// (transformed) value; placeholders embedded in longer strings are
/// substituted textually.
fn resolve_value(value: &Value, params: &ResolvedParameters) -> QueryResult<Value> {
    let Value::String(template) = value else {
        return Ok(value.clone());
    };

    if let Some(name) = sole_placeholder(template) {
        let native = params
            .native(name)
            .ok_or_else(|| QueryError::parameter(name, "no value resolved for client filter"))?;
        return Ok(native.to_json());
    }

    let names = placeholders(template);
    if names.is_empty() {
        return Ok(value.clone());
    }

    let mut out = template.clone();
    for name in names {
        let native = params
            .native(&name)
            .ok_or_else(|| QueryError::parameter(&name, "no value resolved for client filter"))?;
        let text = match native.to_json() {
            Value::String(s) => s,
            other => other.to_string(),
        };
        out = replace_placeholder(&out, &name, &text);
    }
    Ok(Value::String(out))
}

fn replace_placeholder(template: &str, name: &str, text: &str) -> String {
    let mut out = template.to_string();
    for candidate in [format!("{{{{{name}}}}}"), format!("{{{{ {name} }}}}")] {
        out = out.replace(&candidate, text);
    }
    out
}

fn matches(operator: FilterOperator, actual: &Value, expected: &Value) -> bool {
    match operator {
        FilterOperator::Equals => values_equal(actual, expected),
        FilterOperator::NotEquals => !values_equal(actual, expected),
        FilterOperator::Contains => contains(actual, expected),
        FilterOperator::NotContains => !contains(actual, expected),
        FilterOperator::GreaterThan => compare_values(actual, expected) == Some(Ordering::Greater),
        FilterOperator::LessThan => compare_values(actual, expected) == Some(Ordering::Less),
        FilterOperator::In => member_of(actual, expected),
        FilterOperator::NotIn => !member_of(actual, expected),
    }
}

pub(super) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Order two values: numerically when both are numbers, chronologically when
/// both are RFC 3339 timestamps, otherwise as case-insensitive strings.
///
/// `None` when either side is null.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if let (Ok(x), Ok(y)) = (
            chrono::DateTime::parse_from_rfc3339(x.trim()),
            chrono::DateTime::parse_from_rfc3339(y.trim()),
        ) {
            return Some(x.cmp(&y));
        }
    }
    let (x, y) = (as_text(a)?, as_text(b)?);
    Some(x.to_lowercase().cmp(&y.to_lowercase()))
}

/// Loose equality used by `equals`, `in` and array `contains`.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.eq_ignore_ascii_case(if *x { "true" } else { "false" })
        }
        _ => compare_values(a, b) == Some(Ordering::Equal),
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        Value::String(s) => as_text(expected)
            .map(|needle| s.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
        _ => false,
    }
}

fn member_of(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(candidates) => match actual {
            Value::Array(items) => items
                .iter()
                .any(|item| candidates.iter().any(|c| values_equal(item, c))),
            _ => candidates.iter().any(|c| values_equal(actual, c)),
        },
        Value::String(list) if list.contains(',') => list
            .split(',')
            .any(|c| values_equal(actual, &Value::String(c.trim().to_string()))),
        other => values_equal(actual, other),
    }
}
