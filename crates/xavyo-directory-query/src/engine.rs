//! Query execution engine.
//!
//! Runs one declarative query end to end: definition lookup, parameter
//! resolution, query building, credential resolution, adapter execution,
//! post-processing and history recording.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{QueryAdapter, RawResult, Row};
use crate::batch::{BatchItem, BatchOptions};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::credentials::{CredentialContextManager, CredentialStore};
use crate::definition::{BackendType, QueryDefinition};
use crate::error::{QueryError, QueryResult};
use crate::filter::{BuiltQuery, FilterBuilder};
use crate::history::{HistoryEntry, HistorySink, HistoryStatus};
use crate::ids::HistoryId;
use crate::params::{ParameterResolver, ResolvedParameters};
use crate::postprocess::PostProcessor;
use crate::registry::QueryRegistry;
use crate::result::{ExecutionMetadata, ExecutionResult};
use crate::transforms::TransformRegistry;

/// Builder for [`QueryEngine`].
pub struct QueryEngineBuilder {
    config: EngineConfig,
    registry: Option<QueryRegistry>,
    transforms: Option<TransformRegistry>,
    adapters: HashMap<BackendType, Arc<dyn QueryAdapter>>,
    credential_store: Option<Arc<dyn CredentialStore>>,
    history: Option<Arc<dyn HistorySink>>,
}

impl QueryEngineBuilder {
    /// Use `registry` instead of the built-in catalogue.
    #[must_use]
    pub fn registry(mut self, registry: QueryRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use `transforms` instead of the built-in transforms.
    #[must_use]
    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Some(transforms);
        self
    }

    /// Register the adapter for its backend, replacing any previous one.
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn QueryAdapter>) -> Self {
        self.adapters.insert(adapter.backend_type(), adapter);
        self
    }

    /// Enable per-user stored credentials. Requires an encryption key.
    #[must_use]
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    #[must_use]
    pub fn history_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.history = Some(sink);
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// Fails if a definition references an unregistered transform, or if a
    /// credential store is set without an encryption key.
    pub fn build(self) -> QueryResult<QueryEngine> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => QueryRegistry::with_builtin()?,
        };
        let transforms = self.transforms.unwrap_or_else(TransformRegistry::with_builtin);

        registry.validate()?;
        registry.validate_transforms(&transforms)?;

        let config = self.config;
        let mut credentials = CredentialContextManager::new(config.system_credentials)
            .with_cache_ttl(config.credential_cache_ttl)
            .with_decrypt_failure_policy(config.decrypt_failure_policy);

        if let Some(store) = self.credential_store {
            let encryption = config.encryption.ok_or_else(|| {
                QueryError::configuration(
                    "credential store configured without CREDENTIAL_ENCRYPTION_KEY",
                )
            })?;
            credentials = credentials.with_store(store, encryption);
        }

        info!(
            definitions = registry.len(),
            transforms = transforms.names().len(),
            adapters = self.adapters.len(),
            history = self.history.is_some(),
            "Directory query engine initialized"
        );

        Ok(QueryEngine {
            registry,
            transforms,
            adapters: self.adapters,
            credentials,
            history: self.history,
            resolver: ParameterResolver::new(),
            settings: EngineSettings {
                default_timeout: config.default_timeout,
                history_store_results: config.history_store_results,
                max_batch_concurrency: config.max_batch_concurrency,
            },
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct EngineSettings {
    default_timeout: std::time::Duration,
    history_store_results: bool,
    max_batch_concurrency: usize,
}

/// Executes declarative directory queries.
pub struct QueryEngine {
    registry: QueryRegistry,
    transforms: TransformRegistry,
    adapters: HashMap<BackendType, Arc<dyn QueryAdapter>>,
    credentials: CredentialContextManager,
    history: Option<Arc<dyn HistorySink>>,
    resolver: ParameterResolver,
    settings: EngineSettings,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<_> = self.adapters.keys().map(BackendType::as_str).collect();
        backends.sort_unstable();
        f.debug_struct("QueryEngine")
            .field("definitions", &self.registry.len())
            .field("transforms", &self.transforms)
            .field("adapters", &backends)
            .field("credentials", &self.credentials)
            .field("history", &self.history.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Backend output after post-processing.
struct Processed {
    rows: Vec<Row>,
    raw: RawResult,
}

impl QueryEngine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> QueryEngineBuilder {
        QueryEngineBuilder {
            config,
            registry: None,
            transforms: None,
            adapters: HashMap::new(),
            credential_store: None,
            history: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialContextManager {
        &self.credentials
    }

    #[must_use]
    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    /// Run one query.
    ///
    /// Lookup and parameter errors are returned before any backend call and
    /// are not recorded. Later failures are recorded as `failed` history
    /// entries (when `save_history` is set) and then returned unchanged.
    #[instrument(skip(self, ctx), fields(query_id = %ctx.query_id, user_id = ?ctx.user_id))]
    pub async fn execute_query(&self, ctx: ExecutionContext) -> QueryResult<ExecutionResult> {
        let executed_at = Utc::now();
        let started = Instant::now();

        let definition = self.registry.get_by_id(&ctx.query_id).ok_or_else(|| {
            QueryError::DefinitionNotFound {
                query_id: ctx.query_id.clone(),
            }
        })?;
        let backend = definition.backend_type();
        let params = self.resolver.resolve(&definition.parameters, &ctx.parameters)?;
        let query = FilterBuilder::build_query(&definition, &params, ctx.search_base())?;
        let adapter = self
            .adapters
            .get(&backend)
            .cloned()
            .ok_or(QueryError::AdapterNotConfigured { backend })?;

        let outcome = self
            .run(&definition, adapter.as_ref(), &query, &params, &ctx)
            .await;
        let execution_time_ms = elapsed_ms(started);

        match outcome {
            Ok(processed) => {
                let row_count = processed.rows.len();
                let history_id = if ctx.save_history {
                    let payload = self
                        .settings
                        .history_store_results
                        .then(|| rows_payload(&processed.rows));
                    self.record(HistoryEntry {
                        user_id: ctx.user_id,
                        query_id: ctx.query_id.clone(),
                        executed_at,
                        parameters: ctx.parameters.clone(),
                        status: HistoryStatus::Completed,
                        row_count,
                        execution_time_ms,
                        error_message: None,
                        results_payload: payload,
                    })
                    .await
                } else {
                    None
                };

                info!(
                    backend = %backend,
                    row_count,
                    execution_time_ms,
                    "Query executed"
                );

                Ok(ExecutionResult {
                    query_id: ctx.query_id,
                    executed_at,
                    execution_time_ms,
                    row_count,
                    data: processed.rows,
                    metadata: ExecutionMetadata {
                        total_count: processed.raw.total_count,
                        next_link: processed.raw.next_link,
                        backend: Some(backend),
                        history_id,
                    },
                    error: None,
                })
            }
            Err(err) => {
                warn!(
                    backend = %backend,
                    execution_time_ms,
                    error_code = err.error_code(),
                    error = %err,
                    "Query execution failed"
                );

                if ctx.save_history {
                    self.record(HistoryEntry {
                        user_id: ctx.user_id,
                        query_id: ctx.query_id.clone(),
                        executed_at,
                        parameters: ctx.parameters.clone(),
                        status: HistoryStatus::Failed,
                        row_count: 0,
                        execution_time_ms,
                        error_message: Some(err.to_string()),
                        results_payload: None,
                    })
                    .await;
                }
                Err(err)
            }
        }
    }

    /// Run several queries, returning one result per item in input order.
    ///
    /// Item failures are captured as results carrying an error message.
    #[instrument(skip(self, items, options), fields(items = items.len()))]
    pub async fn execute_batch(
        &self,
        items: Vec<BatchItem>,
        options: BatchOptions,
    ) -> Vec<ExecutionResult> {
        let concurrency = options.effective_concurrency(self.settings.max_batch_concurrency);
        debug!(concurrency, "Executing batch");

        let results: Vec<ExecutionResult> = stream::iter(
            items
                .into_iter()
                .map(|item| self.execute_batch_item(item.into_context(&options))),
        )
        .buffered(concurrency)
        .collect()
        .await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(total = results.len(), failed, "Batch executed");
        results
    }

    async fn execute_batch_item(&self, ctx: ExecutionContext) -> ExecutionResult {
        let query_id = ctx.query_id.clone();
        let executed_at: DateTime<Utc> = Utc::now();
        let started = Instant::now();

        match self.execute_query(ctx).await {
            Ok(result) => result,
            Err(err) => {
                debug!(query_id = %query_id, error = %err, "Batch item failed");
                ExecutionResult::failed(query_id, executed_at, elapsed_ms(started), err.to_string())
            }
        }
    }

    async fn run(
        &self,
        definition: &QueryDefinition,
        adapter: &dyn QueryAdapter,
        query: &BuiltQuery,
        params: &ResolvedParameters,
        ctx: &ExecutionContext,
    ) -> QueryResult<Processed> {
        let credentials = self
            .credentials
            .get_credentials(definition.backend_type(), &ctx.caller())
            .await?;

        let options = ctx
            .options
            .to_execution_options(self.settings.default_timeout);
        let timeout = options.timeout;

        let raw = tokio::time::timeout(timeout, adapter.execute(query, &credentials, &options))
            .await
            .map_err(|_| QueryError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        debug!(
            raw_rows = raw.count,
            backend_time_ms = raw.execution_time_ms,
            "Adapter returned"
        );

        let mut raw = raw;
        let rows = PostProcessor::new(&self.transforms).run(
            definition,
            std::mem::take(&mut raw.data),
            params,
        )?;

        Ok(Processed { rows, raw })
    }

    /// Write a history entry. Failures are logged, never propagated.
    async fn record(&self, entry: HistoryEntry) -> Option<HistoryId> {
        let sink = self.history.as_ref()?;
        let query_id = entry.query_id.clone();
        match sink.record(entry).await {
            Ok(id) => {
                debug!(history_id = %id, "Recorded execution history");
                Some(id)
            }
            Err(e) => {
                warn!(query_id = %query_id, error = %e, "Failed to record execution history");
                None
            }
        }
    }
}

fn rows_payload(rows: &[Row]) -> Value {
    Value::Array(rows.iter().cloned().map(Value::Object).collect())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

