//! Per-invocation execution context.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::ExecutionOptions;
use crate::credentials::{CallerContext, Credentials};
use crate::ids::{CredentialId, UserId};

/// Caller-tunable execution options. Unset fields take engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub include_count: bool,
    pub page_size: Option<u32>,
    pub max_records: Option<usize>,
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    /// Resolve against the engine's default timeout.
    #[must_use]
    pub fn to_execution_options(&self, default_timeout: Duration) -> ExecutionOptions {
        ExecutionOptions {
            include_count: self.include_count,
            page_size: self.page_size,
            max_records: self.max_records,
            timeout: self.timeout.unwrap_or(default_timeout),
        }
    }
}

/// Backend-specific overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct BackendContext {
    /// Credentials to use as-is, bypassing resolution.
    pub credentials: Option<Arc<Credentials>>,
    pub use_system_credentials: bool,
    /// LDAP search base overriding the definition's base.
    pub search_base: Option<String>,
}

/// Everything needed to run one query.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub query_id: String,
    pub user_id: Option<UserId>,
    pub credential_id: Option<CredentialId>,
    pub parameters: Map<String, Value>,
    pub options: QueryOptions,
    /// Record the outcome through the history sink.
    pub save_history: bool,
    pub backend_context: Option<BackendContext>,
}

impl ExecutionContext {
    /// Context for `query_id` with no parameters; history is saved.
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            user_id: None,
            credential_id: None,
            parameters: Map::new(),
            options: QueryOptions::default(),
            save_history: true,
            backend_context: None,
        }
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
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_history(mut self, save_history: bool) -> Self {
        self.save_history = save_history;
        self
    }

    #[must_use]
    pub fn with_backend_context(mut self, backend_context: BackendContext) -> Self {
        self.backend_context = Some(backend_context);
        self
    }

    /// Use these credentials instead of resolving any.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.backend_context
            .get_or_insert_with(BackendContext::default)
            .credentials = Some(Arc::new(credentials));
        self
    }

    #[must_use]
    pub fn with_system_credentials(mut self) -> Self {
        self.backend_context
            .get_or_insert_with(BackendContext::default)
            .use_system_credentials = true;
        self
    }

    /// LDAP search base override, if any.
    #[must_use]
    pub fn search_base(&self) -> Option<&str> {
        self.backend_context
            .as_ref()
            .and_then(|b| b.search_base.as_deref())
    }

    /// Identity used for credential resolution.
    #[must_use]
    pub fn caller(&self) -> CallerContext {
        let backend = self.backend_context.as_ref();
        CallerContext {
            user_id: self.user_id,
            credential_id: self.credential_id,
            explicit: backend.and_then(|b| b.credentials.clone()),
            use_system_credentials: backend.is_some_and(|b| b.use_system_credentials),
        }
    }
}
