//! Directory query error types
//!
//! Error definitions with transient/permanent classification so callers can
//! decide whether a retry makes sense. The engine itself never retries.

use thiserror::Error;

use crate::definition::BackendType;

/// Error that can occur while building or executing a directory query.
#[derive(Debug, Error)]
pub enum QueryError {
    // Lookup and configuration errors (raised before any backend call)
    /// No definition registered under the requested id.
    #[error("query definition '{query_id}' not found")]
    DefinitionNotFound { query_id: String },

    /// A definition with the same id is already registered.
    #[error("query definition '{query_id}' is already registered")]
    DuplicateDefinition { query_id: String },

    /// Parameter missing, of the wrong type, out of range, or unresolved in a template.
    #[error("invalid parameter '{parameter}': {message}")]
    ParameterValidation { parameter: String, message: String },

    /// Engine or definition configuration is invalid.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// No adapter registered for the backend a definition targets.
    #[error("no adapter configured for backend '{backend}'")]
    AdapterNotConfigured { backend: BackendType },

    // Credential errors
    /// Credentials could not be resolved (system credentials incomplete,
    /// or per-user decrypt failure with no usable fallback).
    #[error("credential error: {message}")]
    Credential { message: String },

    // Backend errors
    /// Backend unreachable or the connection dropped.
    #[error("connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend call exceeded `options.timeout`.
    #[error("query timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Backend returned an application-level error.
    #[error("query execution failed: {}", format_execution_error(.code.as_deref(), .message))]
    QueryExecution {
        code: Option<String>,
        message: String,
    },

    // Post-processing errors
    /// Named post-processing transform missing or failing.
    #[error("transform '{name}' failed: {message}")]
    Transform { name: String, message: String },

    // Persistence errors
    /// History sink or credential store failure.
    #[error("persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

fn format_execution_error(code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) => format!("{code} - {message}"),
        None => message.to_string(),
    }
}

impl QueryError {
    /// Check if this error is transient and a caller-side retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueryError::Connection { .. } | QueryError::Timeout { .. }
        )
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether this error is raised before any backend call is attempted.
    ///
    /// Such errors are surfaced directly and never written to history.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            QueryError::DefinitionNotFound { .. }
                | QueryError::DuplicateDefinition { .. }
                | QueryError::ParameterValidation { .. }
                | QueryError::AdapterNotConfigured { .. }
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::DefinitionNotFound { .. } => "DEFINITION_NOT_FOUND",
            QueryError::DuplicateDefinition { .. } => "DUPLICATE_DEFINITION",
            QueryError::ParameterValidation { .. } => "PARAMETER_VALIDATION",
            QueryError::Configuration { .. } => "INVALID_CONFIG",
            QueryError::AdapterNotConfigured { .. } => "ADAPTER_NOT_CONFIGURED",
            QueryError::Credential { .. } => "CREDENTIAL_ERROR",
            QueryError::Connection { .. } => "CONNECTION_FAILED",
            QueryError::Timeout { .. } => "TIMEOUT",
            QueryError::QueryExecution { .. } => "QUERY_EXECUTION_FAILED",
            QueryError::Transform { .. } => "TRANSFORM_FAILED",
            QueryError::Persistence { .. } => "PERSISTENCE_ERROR",
            QueryError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }

    // Convenience constructors

    /// Create a parameter validation error.
    pub fn parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::ParameterValidation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        QueryError::Configuration {
            message: message.into(),
        }
    }

    /// Create a credential error.
    pub fn credential(message: impl Into<String>) -> Self {
        QueryError::Credential {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        QueryError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        QueryError::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query execution error without a backend error code.
    pub fn execution(message: impl Into<String>) -> Self {
        QueryError::QueryExecution {
            code: None,
            message: message.into(),
        }
    }

    /// Create a query execution error carrying the backend's error code.
    pub fn execution_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::QueryExecution {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Create a transform error.
    pub fn transform(name: impl Into<String>, message: impl Into<String>) -> Self {
        QueryError::Transform {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        QueryError::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Create a persistence error with source.
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        QueryError::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Serialization {
            message: e.to_string(),
        }
    }
}

/// Result type for directory query operations.
pub type QueryResult<T> = Result<T, QueryError>;
