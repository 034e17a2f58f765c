//! Group-by aggregation.

use serde_json::{Number, Value};
use std::collections::HashMap;

use super::lookup;
use crate::adapter::Row;
use crate::definition::{AggregateOp, AggregateSpec};

#[derive(Default)]
struct Accumulator {
    rows: usize,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

/// Group rows by `spec.group_by` and compute the declared metrics.
///
/// Groups keep the order in which they first appear.
#[must_use]
pub fn aggregate(rows: Vec<Row>, spec: &AggregateSpec) -> Vec<Row> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(Row, Accumulator)> = Vec::new();

    for row in &rows {
        let mut key_row = Row::new();
        for field in &spec.group_by {
            key_row.insert(field.clone(), lookup(row, field).cloned().unwrap_or(Value::Null));
        }
        let key = Value::Object(key_row.clone()).to_string();

        let slot = *index.entry(key).or_insert_with(|| {
            groups.push((
                key_row,
                Accumulator {
                    rows: 0,
                    sums: vec![0.0; spec.metrics.len()],
                    counts: vec![0; spec.metrics.len()],
                },
            ));
            groups.len() - 1
        });

        let acc = &mut groups[slot].1;
        acc.rows += 1;
        for (i, metric) in spec.metrics.iter().enumerate() {
            let Some(field) = metric.field.as_deref() else {
                continue;
            };
            if let Some(n) = lookup(row, field).and_then(numeric) {
                acc.sums[i] += n;
                acc.counts[i] += 1;
            }
        }
    }

    groups
        .into_iter()
        .map(|(mut out, acc)| {
            for (i, metric) in spec.metrics.iter().enumerate() {
                let value = match metric.op {
                    AggregateOp::Count => Value::from(acc.rows),
                    AggregateOp::Sum => number_value(acc.sums[i]),
                    AggregateOp::Avg if acc.counts[i] == 0 => Value::Null,
                    AggregateOp::Avg => number_value(acc.sums[i] / acc.counts[i] as f64),
                };
                out.insert(metric.alias.clone(), value);
            }
            out
        })
        .collect()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integral results are emitted as integers.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::AggregateMetric;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn metric(op: AggregateOp, field: Option<&str>, alias: &str) -> AggregateMetric {
        AggregateMetric {
            op,
            field: field.map(str::to_string),
            alias: alias.to_string(),
        }
    }

    #[test]
    fn test_group_by_with_metrics() {
        let rows = vec![
            row(json!({ "dept": "IT", "days": 10 })),
            row(json!({ "dept": "Sales", "days": 3 })),
            row(json!({ "dept": "IT", "days": 5 })),
            row(json!({ "dept": "IT", "days": null })),
        ];
        let spec = AggregateSpec {
            group_by: vec!["dept".to_string()],
            metrics: vec![
                metric(AggregateOp::Count, None, "users"),
                metric(AggregateOp::Sum, Some("days"), "totalDays"),
                metric(AggregateOp::Avg, Some("days"), "avgDays"),
            ],
        };

        let out = aggregate(rows, &spec);
        assert_eq!(
            out,
            vec![
                row(json!({ "dept": "IT", "users": 3, "totalDays": 15, "avgDays": 7.5 })),
                row(json!({ "dept": "Sales", "users": 1, "totalDays": 3, "avgDays": 3 })),
            ]
        );
    }

    #[test]
    fn test_missing_group_field_groups_as_null() {
        let rows = vec![row(json!({ "a": 1 })), row(json!({ "dept": "IT" }))];
        let spec = AggregateSpec {
            group_by: vec!["dept".to_string()],
            metrics: vec![metric(AggregateOp::Avg, Some("a"), "avgA")],
        };

        let out = aggregate(rows, &spec);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["dept"], Value::Null);
        assert_eq!(out[0]["avgA"], json!(1));
        assert_eq!(out[1]["avgA"], Value::Null);
    }
}
