//! Batch execution inputs.

use serde_json::{Map, Value};

use crate::context::{BackendContext, ExecutionContext, QueryOptions};
use crate::ids::{CredentialId, UserId};

/// Hard upper bound on concurrently running batch items.
pub const MAX_BATCH_CONCURRENCY: usize = 10;

/// One query in a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub query_id: String,
    pub parameters: Map<String, Value>,
    /// Per-item options; engine defaults when unset.
    pub options: Option<QueryOptions>,
}

impl BatchItem {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            parameters: Map::new(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Execution context for this item under the shared batch settings.
    #[must_use]
    pub fn into_context(self, shared: &BatchOptions) -> ExecutionContext {
        ExecutionContext {
            query_id: self.query_id,
            user_id: shared.user_id,
            credential_id: shared.credential_id,
            parameters: self.parameters,
            options: self.options.unwrap_or_default(),
            save_history: shared.save_history,
            backend_context: shared.backend_context.clone(),
        }
    }
}

/// Settings shared by every item of a batch.
///
/// History is off unless requested; items run one at a time unless a
/// higher `concurrency` is set.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub user_id: Option<UserId>,
    pub credential_id: Option<CredentialId>,
    pub backend_context: Option<BackendContext>,
    pub save_history: bool,
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            credential_id: None,
            backend_context: None,
            save_history: false,
            concurrency: 1,
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_credential_id(mut self, credential_id: CredentialId) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    #[must_use]
    pub fn with_backend_context(mut self, backend_context: BackendContext) -> Self {
        self.backend_context = Some(backend_context);
        self
    }

    #[must_use]
    pub fn with_history(mut self, save_history: bool) -> Self {
        self.save_history = save_history;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Requested concurrency clamped to `1..=limit` (and never above 10).
    #[must_use]
    pub fn effective_concurrency(&self, limit: usize) -> usize {
        let upper = limit.clamp(1, MAX_BATCH_CONCURRENCY);
        self.concurrency.clamp(1, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_sequential_without_history() {
        let options = BatchOptions::new();
        assert!(!options.save_history);
        assert_eq!(options.effective_concurrency(10), 1);
    }

    #[test]
    fn test_concurrency_clamped() {
        assert_eq!(BatchOptions::new().with_concurrency(0).effective_concurrency(10), 1);
        assert_eq!(BatchOptions::new().with_concurrency(50).effective_concurrency(10), 10);
        assert_eq!(BatchOptions::new().with_concurrency(8).effective_concurrency(4), 4);
        assert_eq!(BatchOptions::new().with_concurrency(8).effective_concurrency(99), 8);
    }

    #[test]
    fn test_item_inherits_shared_context() {
        let shared = BatchOptions::new()
            .with_user(UserId::new(5))
            .with_history(true);
        let ctx = BatchItem::new("ad_disabled_users")
            .with_parameter("department", json!("Finance"))
            .into_context(&shared);

        assert_eq!(ctx.query_id, "ad_disabled_users");
        assert_eq!(ctx.user_id, Some(UserId::new(5)));
        assert!(ctx.save_history);
        assert_eq!(ctx.parameters["department"], json!("Finance"));
    }
}
