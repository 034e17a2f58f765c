//! Runtime parameter resolution.
//!
//! Turns the caller's loosely typed parameter map into validated values:
//! defaults are applied, required parameters enforced, types coerced and
//! checked against the declared constraints, and the declared transform run
//! to produce the backend-native form used for template substitution.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::definition::{ParameterSpec, ParameterTransform, ValidationRules, ValueType};
use crate::error::{QueryError, QueryResult};
use crate::filter::{escape_ldap_value, escape_odata, Dialect};
use crate::time;

/// Backend-native form of a parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Number(Number),
    /// Plain text; escaped and quoted according to the target dialect.
    Text(String),
    Date(DateTime<Utc>),
    /// Windows FileTime ticks.
    FileTime(i64),
    /// Already-native token inserted verbatim in every dialect.
    Literal(String),
    /// Text already escaped for `dialect`; it is never escaped twice there.
    Escaped { dialect: Dialect, value: String },
    List(Vec<NativeValue>),
    Object(Map<String, Value>),
}

impl NativeValue {
    /// JSON form used when a parameter feeds client-side processing.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            NativeValue::Null => Value::Null,
            NativeValue::Bool(b) => Value::Bool(*b),
            NativeValue::Number(n) => Value::Number(n.clone()),
            NativeValue::Text(s) | NativeValue::Literal(s) => Value::String(s.clone()),
            NativeValue::Escaped { value, .. } => Value::String(value.clone()),
            NativeValue::Date(d) => Value::String(time::format_iso(*d)),
            NativeValue::FileTime(ft) => Value::String(ft.to_string()),
            NativeValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            NativeValue::Object(map) => Value::Object(map.clone()),
        }
    }
}

/// A validated parameter in both its logical and native forms.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameter {
    /// Validated, type-coerced value as supplied (or defaulted).
    pub logical: Value,
    /// Value after the declared transform, used for substitution.
    pub native: NativeValue,
}

/// All parameters of one execution after resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParameters {
    values: BTreeMap<String, ResolvedParameter>,
}

impl ResolvedParameters {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResolvedParameter> {
        self.values.get(name)
    }

    #[must_use]
    pub fn native(&self, name: &str) -> Option<&NativeValue> {
        self.values.get(name).map(|p| &p.native)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Logical values keyed by name, as handed to row transforms.
    #[must_use]
    pub fn logical_map(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.logical.clone()))
            .collect()
    }

    pub fn insert(&mut self, name: impl Into<String>, parameter: ResolvedParameter) {
        self.values.insert(name.into(), parameter);
    }
}

/// Validates and transforms runtime parameters against a definition's schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterResolver;

impl ParameterResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve parameters using the current time for date transforms.
    pub fn resolve(
        &self,
        specs: &BTreeMap<String, ParameterSpec>,
        supplied: &Map<String, Value>,
    ) -> QueryResult<ResolvedParameters> {
        self.resolve_at(specs, supplied, Utc::now())
    }

    /// Resolve parameters relative to `now`.
    pub fn resolve_at(
        &self,
        specs: &BTreeMap<String, ParameterSpec>,
        supplied: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> QueryResult<ResolvedParameters> {
        for name in supplied.keys() {
            if !specs.contains_key(name) {
                debug!(parameter = %name, "Ignoring undeclared parameter");
            }
        }

        let mut resolved = ResolvedParameters::default();

        for (name, spec) in specs {
            let raw = match supplied.get(name) {
                Some(v) if !v.is_null() => Some(v.clone()),
                _ => spec.default.clone(),
            };

            let Some(raw) = raw else {
                if spec.required {
                    return Err(QueryError::parameter(name, "required parameter is missing"));
                }
                continue;
            };

            let logical = coerce(name, spec.value_type, raw)?;
            if let Some(rules) = &spec.validation {
                check_constraints(name, &logical, rules)?;
            }
            let native = match spec.transform {
                Some(transform) => apply_transform(name, transform, spec.value_type, &logical, now)?,
                None => to_native(spec.value_type, &logical),
            };

            resolved.insert(name.clone(), ResolvedParameter { logical, native });
        }

        Ok(resolved)
    }
}

/// Coerce a supplied value to the declared type.
fn coerce(name: &str, value_type: ValueType, value: Value) -> QueryResult<Value> {
    let mismatch = |v: &Value| {
        QueryError::parameter(name, format!("expected {value_type}, got {}", json_type(v)))
    };

    match value_type {
        ValueType::String => match value {
            Value::String(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
        ValueType::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(ref s) => parse_number(s.trim())
                .map(Value::Number)
                .ok_or_else(|| QueryError::parameter(name, format!("'{s}' is not a number"))),
            other => Err(mismatch(&other)),
        },
        ValueType::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::String(ref s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(QueryError::parameter(name, format!("'{s}' is not a boolean"))),
            },
            other => Err(mismatch(&other)),
        },
        ValueType::Date => match value {
            Value::String(ref s) => parse_date(s)
                .map(|d| Value::String(time::format_iso(d)))
                .ok_or_else(|| QueryError::parameter(name, format!("'{s}' is not a valid date"))),
            other => Err(mismatch(&other)),
        },
        ValueType::Array => match value {
            Value::Array(_) => Ok(value),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            other => Err(mismatch(&other)),
        },
        ValueType::Object => match value {
            Value::Object(_) => Ok(value),
            other => Err(mismatch(&other)),
        },
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_constraints(name: &str, value: &Value, rules: &ValidationRules) -> QueryResult<()> {
    let (measure, unit) = match value {
        Value::Number(n) => (n.as_f64(), "value"),
        Value::String(s) => (Some(s.chars().count() as f64), "length"),
        Value::Array(a) => (Some(a.len() as f64), "length"),
        _ => (None, "value"),
    };

    if let Some(measure) = measure {
        if let Some(min) = rules.min {
            if measure < min {
                return Err(QueryError::parameter(
                    name,
                    format!("{unit} {measure} is below minimum {min}"),
                ));
            }
        }
        if let Some(max) = rules.max {
            if measure > max {
                return Err(QueryError::parameter(
                    name,
                    format!("{unit} {measure} exceeds maximum {max}"),
                ));
            }
        }
    }

    if let (Some(pattern), Value::String(s)) = (&rules.pattern, value) {
        let re = Regex::new(pattern)
            .map_err(|e| QueryError::parameter(name, format!("invalid pattern: {e}")))?;
        if !re.is_match(s) {
            return Err(QueryError::parameter(
                name,
                format!("value does not match pattern {pattern}"),
            ));
        }
    }

    if let Some(allowed) = &rules.allowed {
        if !allowed.iter().any(|candidate| json_eq(candidate, value)) {
            return Err(QueryError::parameter(
                name,
                format!("value {value} is not one of the allowed values"),
            ));
        }
    }

    Ok(())
}

/// JSON equality that treats `1` and `1.0` as equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn to_native(value_type: ValueType, logical: &Value) -> NativeValue {
    match (value_type, logical) {
        (ValueType::Date, Value::String(s)) => {
            parse_date(s).map_or_else(|| NativeValue::Text(s.clone()), NativeValue::Date)
        }
        (_, Value::Array(items)) => NativeValue::List(
            items
                .iter()
                .map(|item| to_native(ValueType::String, item))
                .collect(),
        ),
        (_, Value::Null) => NativeValue::Null,
        (_, Value::Bool(b)) => NativeValue::Bool(*b),
        (_, Value::Number(n)) => NativeValue::Number(n.clone()),
        (_, Value::String(s)) => NativeValue::Text(s.clone()),
        (_, Value::Object(map)) => NativeValue::Object(map.clone()),
    }
}

fn apply_transform(
    name: &str,
    transform: ParameterTransform,
    value_type: ValueType,
    logical: &Value,
    now: DateTime<Utc>,
) -> QueryResult<NativeValue> {
    let as_number = || {
        logical.as_f64().ok_or_else(|| {
            QueryError::parameter(name, format!("transform {transform:?} requires a number"))
        })
    };
    let as_text = || {
        logical.as_str().ok_or_else(|| {
            QueryError::parameter(name, format!("transform {transform:?} requires a string"))
        })
    };

    let out_of_range = || QueryError::parameter(name, "value is out of range for a date offset");
    let days_ago = || time::days_to_date(as_number()?, now).ok_or_else(out_of_range);
    let hours_ago = || time::hours_to_date(as_number()?, now).ok_or_else(out_of_range);
    let file_time = |date| time::to_file_time(date).ok_or_else(out_of_range);

    let native = match transform {
        ParameterTransform::DaysToDate => NativeValue::Date(days_ago()?),
        ParameterTransform::HoursToDate => NativeValue::Date(hours_ago()?),
        ParameterTransform::DaysToFileTime => NativeValue::FileTime(file_time(days_ago()?)?),
        ParameterTransform::HoursToFileTime => NativeValue::FileTime(file_time(hours_ago()?)?),
        ParameterTransform::FormatDate => {
            let raw = as_text()?;
            let date = parse_date(raw).ok_or_else(|| {
                QueryError::parameter(name, format!("'{raw}' is not a valid date"))
            })?;
            NativeValue::Literal(time::format_iso(date))
        }
        ParameterTransform::EscapeOData => NativeValue::Escaped {
            dialect: Dialect::OData,
            value: escape_odata(as_text()?),
        },
        ParameterTransform::EscapeLdap => NativeValue::Escaped {
            dialect: Dialect::Ldap,
            value: escape_ldap_value(as_text()?),
        },
    };

    debug!(parameter = %name, ?value_type, ?transform, "Applied parameter transform");
    Ok(native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn specs(entries: Vec<(&str, ParameterSpec)>) -> BTreeMap<String, ParameterSpec> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn supplied(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_required_parameter() {
        let specs = specs(vec![("days", ParameterSpec::new(ValueType::Number).required())]);
        let err = ParameterResolver::new()
            .resolve(&specs, &Map::new())
            .unwrap_err();

        match err {
            QueryError::ParameterValidation { parameter, .. } => assert_eq!(parameter, "days"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_default_applied_and_transformed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let specs = specs(vec![(
            "days",
            ParameterSpec::new(ValueType::Number)
                .with_default(json!(7))
                .with_transform(ParameterTransform::DaysToFileTime),
        )]);

        let resolved = ParameterResolver::new()
            .resolve_at(&specs, &Map::new(), now)
            .unwrap();

        // 2024-01-01T00:00:00Z
        assert_eq!(
            resolved.native("days"),
            Some(&NativeValue::FileTime(133_485_408_000_000_000))
        );
        assert_eq!(resolved.get("days").unwrap().logical, json!(7));
    }

    #[test]
    fn test_huge_day_offsets_rejected() {
        let specs = specs(vec![(
            "days",
            ParameterSpec::new(ValueType::Number)
                .with_transform(ParameterTransform::DaysToFileTime),
        )]);

        for days in [1e7, 1e12, -1e12] {
            let err = ParameterResolver::new()
                .resolve(&specs, &supplied(json!({ "days": days })))
                .unwrap_err();
            match err {
                QueryError::ParameterValidation { parameter, message } => {
                    assert_eq!(parameter, "days");
                    assert!(message.contains("out of range"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_days_to_date_within_tolerance() {
        let specs = specs(vec![(
            "days",
            ParameterSpec::new(ValueType::Number).with_transform(ParameterTransform::DaysToDate),
        )]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "days": 7 })))
            .unwrap();

        let Some(NativeValue::Date(date)) = resolved.native("days") else {
            panic!("expected a date");
        };
        let offset = (Utc::now() - *date).num_seconds() - 7 * 86_400;
        assert!(offset.abs() <= 1, "offset {offset}s");
    }

    #[test]
    fn test_number_coerced_from_string() {
        let specs = specs(vec![("limit", ParameterSpec::new(ValueType::Number))]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "limit": "25" })))
            .unwrap();
        assert_eq!(resolved.get("limit").unwrap().logical, json!(25));

        let err = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "limit": "many" })))
            .unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn test_boolean_coercion_and_type_mismatch() {
        let specs = specs(vec![("enabled", ParameterSpec::new(ValueType::Boolean))]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "enabled": "TRUE" })))
            .unwrap();
        assert_eq!(resolved.native("enabled"), Some(&NativeValue::Bool(true)));

        let err = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "enabled": [1] })))
            .unwrap_err();
        assert!(err.to_string().contains("expected boolean"));
    }

    #[test]
    fn test_min_max_constraints() {
        let specs = specs(vec![(
            "days",
            ParameterSpec::new(ValueType::Number).with_validation(ValidationRules {
                min: Some(1.0),
                max: Some(365.0),
                ..Default::default()
            }),
        )]);
        let resolver = ParameterResolver::new();

        assert!(resolver.resolve(&specs, &supplied(json!({ "days": 30 }))).is_ok());
        assert!(resolver.resolve(&specs, &supplied(json!({ "days": 0 }))).is_err());
        assert!(resolver.resolve(&specs, &supplied(json!({ "days": 400 }))).is_err());
    }

    #[test]
    fn test_pattern_and_enum_constraints() {
        let specs = specs(vec![
            (
                "department",
                ParameterSpec::new(ValueType::String).with_validation(ValidationRules {
                    pattern: Some("^[A-Za-z ]+$".to_string()),
                    ..Default::default()
                }),
            ),
            (
                "userType",
                ParameterSpec::new(ValueType::String).with_validation(ValidationRules {
                    allowed: Some(vec![json!("Member"), json!("Guest")]),
                    ..Default::default()
                }),
            ),
        ]);
        let resolver = ParameterResolver::new();

        assert!(resolver
            .resolve(&specs, &supplied(json!({ "department": "Sales", "userType": "Guest" })))
            .is_ok());

        let err = resolver
            .resolve(&specs, &supplied(json!({ "department": "Sales)(cn=*" })))
            .unwrap_err();
        assert!(err.to_string().contains("department"));

        let err = resolver
            .resolve(&specs, &supplied(json!({ "userType": "Admin" })))
            .unwrap_err();
        assert!(err.to_string().contains("userType"));
    }

    #[test]
    fn test_escape_odata_transform() {
        let specs = specs(vec![(
            "name",
            ParameterSpec::new(ValueType::String).with_transform(ParameterTransform::EscapeOData),
        )]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "name": "O'Brien" })))
            .unwrap();
        assert_eq!(
            resolved.native("name"),
            Some(&NativeValue::Escaped {
                dialect: Dialect::OData,
                value: "O''Brien".to_string()
            })
        );
    }

    #[test]
    fn test_format_date_transform() {
        let specs = specs(vec![(
            "since",
            ParameterSpec::new(ValueType::Date).with_transform(ParameterTransform::FormatDate),
        )]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "since": "2024-01-02" })))
            .unwrap();
        assert_eq!(
            resolved.native("since"),
            Some(&NativeValue::Literal("2024-01-02T00:00:00.000Z".to_string()))
        );
    }

    #[test]
    fn test_array_from_comma_string() {
        let specs = specs(vec![("groups", ParameterSpec::new(ValueType::Array))]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "groups": "Admins, Ops" })))
            .unwrap();
        assert_eq!(resolved.get("groups").unwrap().logical, json!(["Admins", "Ops"]));
    }

    #[test]
    fn test_optional_without_default_is_absent() {
        let specs = specs(vec![("department", ParameterSpec::new(ValueType::String))]);
        let resolved = ParameterResolver::new()
            .resolve(&specs, &supplied(json!({ "unrelated": 1 })))
            .unwrap();
        assert!(resolved.is_empty());
    }
}
