//! Microsoft Graph adapter for the xavyo directory query engine
//!
//! Executes built Graph requests with OAuth2 client-credentials
//! authentication.
//!
//! # Features
//!
//! - Token cache per `(tenant, client)`, refreshed 5 minutes before expiry
//! - `$select`/`$expand`/`$filter`/`$orderby`/`$top`/`$skip`/`$count` query options
//! - `@odata.nextLink` pagination bounded by `maxRecords`
//! - Multi-cloud support (Commercial, US Government, China, Germany)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use xavyo_directory_query::{EngineConfig, QueryEngine};
//! use xavyo_directory_query_graph::{GraphAdapter, GraphAdapterConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = GraphAdapter::new(GraphAdapterConfig::from_env()?)?;
//! let _engine = QueryEngine::builder(EngineConfig::from_env()?)
//!     .adapter(Arc::new(adapter))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod auth;
mod config;

// Re-exports
pub use adapter::GraphAdapter;
pub use auth::TokenCache;
pub use config::{GraphAdapterConfig, GraphCloud, DEFAULT_GRAPH_PAGE_SIZE};
