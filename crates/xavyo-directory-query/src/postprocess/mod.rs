//! Client-side post-processing pipeline.
//!
//! Stages run in a fixed order: client filter, named transform, aggregate,
//! sort, field mappings, limit. Each stage is skipped when the definition
//! does not declare it.

mod aggregate;
mod client_filter;
mod mapping;
mod sort;

pub use aggregate::aggregate;
pub use client_filter::{apply_client_filters, compare_values, values_equal};
pub use mapping::apply_field_mappings;
pub use sort::sort_rows;

use serde_json::Value;
use tracing::debug;

use crate::adapter::Row;
use crate::definition::QueryDefinition;
use crate::error::{QueryError, QueryResult};
use crate::params::ResolvedParameters;
use crate::transforms::TransformRegistry;

/// Look up a possibly dotted path (`manager.displayName`) in a row.
#[must_use]
pub fn lookup<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    if let Some(value) = row.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Runs the post-processing stages of a definition.
#[derive(Debug, Clone, Copy)]
pub struct PostProcessor<'a> {
    transforms: &'a TransformRegistry,
}

impl<'a> PostProcessor<'a> {
    #[must_use]
    pub fn new(transforms: &'a TransformRegistry) -> Self {
        Self { transforms }
    }

    /// Apply every declared stage to `rows`.
    pub fn run(
        &self,
        definition: &QueryDefinition,
        rows: Vec<Row>,
        params: &ResolvedParameters,
    ) -> QueryResult<Vec<Row>> {
        let mut rows = rows;
        let input = rows.len();

        if let Some(pp) = &definition.post_process {
            if !pp.client_filter.is_empty() {
                rows = apply_client_filters(rows, &pp.client_filter, params)?;
            }

            if let Some(name) = pp.transform.as_deref() {
                let transform = self.transforms.get(name).ok_or_else(|| {
                    QueryError::transform(name, "transform is not registered")
                })?;
                rows = transform
                    .apply(rows, &params.logical_map())
                    .map_err(|e| match e {
                        QueryError::Transform { .. } => e,
                        other => QueryError::transform(name, other.to_string()),
                    })?;
            }

            if let Some(spec) = &pp.aggregate {
                rows = aggregate(rows, spec);
            }

            if let Some(spec) = &pp.sort {
                sort_rows(&mut rows, spec);
            }
        }

        if !definition.field_mappings.is_empty() {
            rows = apply_field_mappings(rows, &definition.field_mappings);
        }

        if let Some(limit) = definition.post_process.as_ref().and_then(|pp| pp.limit) {
            rows.truncate(limit);
        }

        debug!(
            query_id = %definition.id,
            input_rows = input,
            output_rows = rows.len(),
            "Post-processing complete"
        );
        Ok(rows)
    }
}
