//! Protocol adapter abstraction.
//!
//! An adapter runs an already-built query against one backend and maps the
//! native records to JSON rows. It knows nothing about definitions,
//! parameters or post-processing.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::credentials::Credentials;
use crate::definition::BackendType;
use crate::error::QueryResult;
use crate::filter::BuiltQuery;

/// One result row: attribute or property name -> value.
pub type Row = Map<String, Value>;

/// Default whole-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-execution knobs passed to the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Ask the backend for a total count.
    pub include_count: bool,
    /// Page size; the adapter default when `None`.
    pub page_size: Option<u32>,
    /// Stop fetching once this many rows are collected.
    pub max_records: Option<usize>,
    pub timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            include_count: false,
            page_size: None,
            max_records: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ExecutionOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn with_count(mut self) -> Self {
        self.include_count = true;
        self
    }
}

/// Rows returned by an adapter, before post-processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub data: Vec<Row>,
    pub count: usize,
    pub execution_time_ms: u64,
    /// Server-reported total, when counting was requested and supported.
    pub total_count: Option<u64>,
    /// Continuation link when fetching stopped before the last page.
    pub next_link: Option<String>,
}

impl RawResult {
    #[must_use]
    pub fn new(data: Vec<Row>) -> Self {
        Self {
            count: data.len(),
            data,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_execution_time_ms(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }
}

/// Executes built queries against one backend.
#[async_trait]
pub trait QueryAdapter: Send + Sync {
    /// Backend this adapter serves.
    fn backend_type(&self) -> BackendType;

    /// Run `query` authenticated with `credentials`.
    async fn execute(
        &self,
        query: &BuiltQuery,
        credentials: &Credentials,
        options: &ExecutionOptions,
    ) -> QueryResult<RawResult>;
}
