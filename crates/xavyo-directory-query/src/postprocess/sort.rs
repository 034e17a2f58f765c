//! Single-field stable sort.

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::cmp::Ordering;

use super::client_filter::as_number;
use super::lookup;
use crate::adapter::Row;
use crate::definition::{SortDirection, SortSpec};

/// Sort rows in place. Null and missing values sort last in both directions.
pub fn sort_rows(rows: &mut [Row], spec: &SortSpec) {
    rows.sort_by(|a, b| {
        let left = lookup(a, &spec.field).filter(|v| !v.is_null());
        let right = lookup(b, &spec.field).filter(|v| !v.is_null());

        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = order(x, y);
                match spec.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }
        }
    });
}

fn order(a: &Value, b: &Value) -> Ordering {
    SortKey::of(a).cmp(&SortKey::of(b))
}

/// Total order over directory values. Numbers (including numeric strings)
/// sort before timestamps, then booleans, then everything else as
/// case-insensitive text.
#[derive(Debug)]
enum SortKey {
    Number(f64),
    Date(DateTime<FixedOffset>),
    Bool(bool),
    Text(String),
}

impl SortKey {
    fn of(value: &Value) -> Self {
        if let Some(n) = as_number(value) {
            return SortKey::Number(n);
        }
        match value {
            Value::Bool(b) => SortKey::Bool(*b),
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map_or_else(|_| SortKey::Text(s.to_lowercase()), SortKey::Date),
            other => SortKey::Text(other.to_string().to_lowercase()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Number(_) => 0,
            SortKey::Date(_) => 1,
            SortKey::Bool(_) => 2,
            SortKey::Text(_) => 3,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(x), SortKey::Number(y)) => x.total_cmp(y),
            (SortKey::Date(x), SortKey::Date(y)) => x.cmp(y),
            (SortKey::Bool(x), SortKey::Bool(y)) => x.cmp(y),
            (SortKey::Text(x), SortKey::Text(y)) => x.cmp(y),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}
