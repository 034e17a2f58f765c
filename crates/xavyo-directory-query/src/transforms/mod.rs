//! Named row transforms.
//!
//! Definitions reference transforms by name (`postProcess.transform`). The
//! registry is built once at startup; the engine refuses to start when a
//! loaded definition names a transform that is not registered.

mod directory;

pub use directory::{
    calculate_inactivity, calculate_password_age, convert_file_times,
    decode_user_account_control, flatten_auth_methods, summarize_licenses,
};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::adapter::Row;
use crate::error::QueryResult;

/// A post-processing function over the whole row set.
///
/// Receives the rows and the logical parameter values; may filter, enrich or
/// reshape rows.
pub trait RowTransform: Send + Sync {
    fn apply(&self, rows: Vec<Row>, params: &Map<String, Value>) -> QueryResult<Vec<Row>>;
}

impl<F> RowTransform for F
where
    F: Fn(Vec<Row>, &Map<String, Value>) -> QueryResult<Vec<Row>> + Send + Sync,
{
    fn apply(&self, rows: Vec<Row>, params: &Map<String, Value>) -> QueryResult<Vec<Row>> {
        self(rows, params)
    }
}

/// Name -> transform lookup table.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn RowTransform>>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("TransformRegistry")
            .field("transforms", &names)
            .finish()
    }
}

impl TransformRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in directory transforms.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("calculateInactivity", calculate_inactivity);
        registry.register("decodeUserAccountControl", decode_user_account_control);
        registry.register("convertFileTimes", convert_file_times);
        registry.register("calculatePasswordAge", calculate_password_age);
        registry.register("flattenAuthMethods", flatten_auth_methods);
        registry.register("summarizeLicenses", summarize_licenses);
        registry
    }

    /// Register (or replace) a transform.
    pub fn register(&mut self, name: impl Into<String>, transform: impl RowTransform + 'static) {
        self.transforms.insert(name.into(), Arc::new(transform));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn RowTransform>> {
        self.transforms.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.transforms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_names() {
        let registry = TransformRegistry::with_builtin();
        assert_eq!(
            registry.names(),
            vec![
                "calculateInactivity",
                "calculatePasswordAge",
                "convertFileTimes",
                "decodeUserAccountControl",
                "flattenAuthMethods",
                "summarizeLicenses",
            ]
        );
    }

    #[test]
    fn test_register_closure() {
        let mut registry = TransformRegistry::new();
        registry.register("tag", |rows: Vec<Row>, _params: &Map<String, Value>| {
            Ok(rows
                .into_iter()
                .map(|mut r| {
                    r.insert("tagged".to_string(), json!(true));
                    r
                })
                .collect())
        });

        let transform = registry.get("tag").unwrap();
        let out = transform.apply(vec![Row::new()], &Map::new()).unwrap();
        assert_eq!(out[0]["tagged"], json!(true));
        assert!(registry.get("missing").is_none());
    }
}
