//! Directory query execution engine for xavyo
//!
//! Runs declarative, parameterised reports against on-premises LDAP/Active
//! Directory and Microsoft Graph through one query format.
//!
//! # Features
//!
//! - JSON query definitions with typed, validated parameters
//! - RFC 4515 LDAP filter and OData `$filter` generation
//! - Credential resolution: caller-supplied, system, or encrypted per-user
//!   credentials with a short-TTL cache
//! - Post-processing pipeline: client filter, named transform, aggregate,
//!   sort, field mapping, limit
//! - Execution history through a pluggable sink
//! - Batch execution with bounded concurrency
//!
//! Protocol adapters live in `xavyo-directory-query-ldap` and
//! `xavyo-directory-query-graph`; PostgreSQL persistence in
//! `xavyo-directory-query-db`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use xavyo_directory_query::{EngineConfig, ExecutionContext, MemoryHistorySink, QueryEngine};
//!
//! # async fn example(adapter: Arc<dyn xavyo_directory_query::QueryAdapter>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = QueryEngine::builder(EngineConfig::from_env()?)
//!     .adapter(adapter)
//!     .history_sink(Arc::new(MemoryHistorySink::new()))
//!     .build()?;
//!
//! let result = engine
//!     .execute_query(ExecutionContext::new("ad_inactive_users").with_parameter("days", json!(90)))
//!     .await?;
//! println!("{} inactive users", result.row_count);
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod batch;
pub mod builtin;
pub mod config;
pub mod context;
pub mod credentials;
pub mod definition;
pub mod engine;
pub mod error;
pub mod filter;
pub mod history;
pub mod ids;
pub mod params;
pub mod postprocess;
pub mod registry;
pub mod result;
pub mod time;
pub mod transforms;

// Re-exports
pub use adapter::{ExecutionOptions, QueryAdapter, RawResult, Row, DEFAULT_TIMEOUT};
pub use batch::{BatchItem, BatchOptions, MAX_BATCH_CONCURRENCY};
pub use config::EngineConfig;
pub use context::{BackendContext, ExecutionContext, QueryOptions};
pub use credentials::{
    CallerContext, CredentialContextManager, CredentialEncryption, CredentialStore, Credentials,
    DecryptFailurePolicy, StoredCredential, SystemCredentials,
};
pub use definition::{BackendType, QueryCategory, QueryDefinition};
pub use engine::{QueryEngine, QueryEngineBuilder};
pub use error::{QueryError, QueryResult};
pub use filter::{BuiltQuery, Dialect, FilterBuilder, GraphRequest, LdapSearch};
pub use history::{HistoryEntry, HistorySink, HistoryStatus, MemoryHistorySink};
pub use ids::{CredentialId, HistoryId, UserId};
pub use params::{NativeValue, ParameterResolver, ResolvedParameters};
pub use registry::QueryRegistry;
pub use result::{ExecutionMetadata, ExecutionResult};
pub use transforms::{RowTransform, TransformRegistry};

// Adapter and sink implementors need the same macro version.
pub use async_trait::async_trait;
