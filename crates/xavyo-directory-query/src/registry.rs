//! Query definition registry.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::builtin;
use crate::definition::{QueryCategory, QueryDefinition};
use crate::error::{QueryError, QueryResult};
use crate::transforms::TransformRegistry;

/// Immutable-after-startup set of query definitions, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    definitions: Vec<Arc<QueryDefinition>>,
    index: HashMap<String, usize>,
}

impl QueryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in LDAP and Graph catalogue.
    pub fn with_builtin() -> QueryResult<Self> {
        let mut registry = Self::new();
        for definition in builtin::definitions()? {
            registry.register(definition)?;
        }
        debug!(definitions = registry.len(), "Loaded built-in query catalogue");
        Ok(registry)
    }

    /// Add a definition. Ids must be unique.
    pub fn register(&mut self, definition: QueryDefinition) -> QueryResult<()> {
        if self.index.contains_key(&definition.id) {
            return Err(QueryError::DuplicateDefinition {
                query_id: definition.id,
            });
        }
        definition.validate()?;

        self.index
            .insert(definition.id.clone(), self.definitions.len());
        self.definitions.push(Arc::new(definition));
        Ok(())
    }

    /// Parse and register definitions from a JSON array.
    pub fn register_json(&mut self, json: &str) -> QueryResult<usize> {
        let definitions: Vec<QueryDefinition> = serde_json::from_str(json)?;
        let count = definitions.len();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(count)
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<Arc<QueryDefinition>> {
        self.index
            .get(id)
            .map(|&i| Arc::clone(&self.definitions[i]))
    }

    /// Definitions in `category`, in registration order.
    #[must_use]
    pub fn get_by_category(&self, category: QueryCategory) -> Vec<Arc<QueryDefinition>> {
        self.definitions
            .iter()
            .filter(|d| d.category == category)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<QueryDefinition>> {
        self.definitions.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Re-check the structural invariants of every definition.
    pub fn validate(&self) -> QueryResult<()> {
        self.definitions.iter().try_for_each(|d| d.validate())
    }

    /// Ensure every referenced post-processing transform is registered.
    pub fn validate_transforms(&self, transforms: &TransformRegistry) -> QueryResult<()> {
        for definition in &self.definitions {
            if let Some(name) = definition.transform_name() {
                if !transforms.contains(name) {
                    return Err(QueryError::transform(
                        name,
                        format!("referenced by query '{}' but not registered", definition.id),
                    ));
                }
            }
        }
        Ok(())
    }
}
