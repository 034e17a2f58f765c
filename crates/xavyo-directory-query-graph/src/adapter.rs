//! Microsoft Graph query adapter
//!
//! Issues the built request, follows `@odata.nextLink` pages and maps each
//! returned object to a row.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use xavyo_directory_query::{
    BackendType, BuiltQuery, Credentials, ExecutionOptions, GraphRequest, QueryAdapter,
    QueryError, QueryResult, RawResult, Row,
};

use crate::auth::TokenCache;
use crate::config::GraphAdapterConfig;

/// OData error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    code: String,
    message: String,
}

/// One page of a collection response.
#[derive(Debug, Deserialize)]
struct ODataPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.count")]
    count: Option<u64>,
}

/// Executes Graph requests for any tenant whose app credentials are supplied.
#[derive(Debug)]
pub struct GraphAdapter {
    config: GraphAdapterConfig,
    http_client: reqwest::Client,
    tokens: TokenCache,
}

impl GraphAdapter {
    /// Create an adapter with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be created.
    pub fn new(config: GraphAdapterConfig) -> QueryResult<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| QueryError::configuration(format!("Failed to create HTTP client: {e}")))?;

        let tokens = TokenCache::new(
            http_client.clone(),
            config.login_endpoint(),
            config.graph_endpoint(),
        );

        Ok(Self {
            config,
            http_client,
            tokens,
        })
    }

    #[must_use]
    pub fn config(&self) -> &GraphAdapterConfig {
        &self.config
    }

    /// Token cache shared by all executions of this adapter.
    #[must_use]
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Build the first-page URL for `request`.
    pub fn request_url(
        &self,
        request: &GraphRequest,
        options: &ExecutionOptions,
    ) -> QueryResult<Url> {
        let base = format!(
            "{}/{}{}",
            self.config.graph_endpoint(),
            request.api_version.as_str(),
            request.endpoint
        );
        let mut url = Url::parse(&base).map_err(|e| {
            QueryError::configuration(format!("invalid Graph URL '{base}': {e}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            if !request.select.is_empty() {
                query.append_pair("$select", &request.select.join(","));
            }
            if !request.expand.is_empty() {
                query.append_pair("$expand", &request.expand.join(","));
            }
            if let Some(filter) = &request.filter {
                query.append_pair("$filter", filter);
            }
            if let Some(order_by) = &request.order_by {
                query.append_pair("$orderby", order_by);
            }
            let top = request
                .top
                .or(options.page_size)
                .unwrap_or(self.config.page_size);
            query.append_pair("$top", &top.to_string());
            if let Some(skip) = request.skip {
                query.append_pair("$skip", &skip.to_string());
            }
            if wants_count(request, options) {
                query.append_pair("$count", "true");
            }
        }

        Ok(url)
    }

    async fn fetch_page(&self, url: &str, token: &SecretString, count: bool) -> QueryResult<ODataPage> {
        debug!(url = %url, "Fetching Graph page");

        let mut request = self
            .http_client
            .get(url)
            .bearer_auth(token.expose_secret());
        if count {
            request = request.header("ConsistencyLevel", "eventual");
        }

        let response = request.send().await.map_err(|e| {
            QueryError::connection_with_source("Graph request failed".to_string(), e)
        })?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            let detail = odata_error(&body).map_or(body, |e| format!("{} - {}", e.code, e.message));
            warn!(status = %status, retry_after = ?retry_after, "Graph request throttled or unavailable");
            return Err(QueryError::connection(match retry_after {
                Some(after) => format!("Graph returned {status} (retry after {after}s): {detail}"),
                None => format!("Graph returned {status}: {detail}"),
            }));
        }

        let body = response.text().await.map_err(|e| {
            QueryError::connection_with_source("Failed to read Graph response".to_string(), e)
        })?;

        if !status.is_success() {
            return Err(match odata_error(&body) {
                Some(e) => QueryError::execution_with_code(e.code, e.message),
                None => QueryError::execution_with_code(status.as_u16().to_string(), body),
            });
        }

        // Graph occasionally reports errors inside a 2xx body.
        if let Some(e) = odata_error(&body) {
            return Err(QueryError::execution_with_code(e.code, e.message));
        }

        parse_page(&body)
    }

    async fn run(
        &self,
        request: &GraphRequest,
        tenant_id: &str,
        client_id: &str,
        client_secret: &SecretString,
        options: &ExecutionOptions,
    ) -> QueryResult<RawResult> {
        let token = self.tokens.get_token(tenant_id, client_id, client_secret).await?;
        let count = wants_count(request, options);

        let mut url = self.request_url(request, options)?.to_string();
        let mut rows: Vec<Row> = Vec::new();
        let mut total_count = None;
        let mut pages = 0u32;

        loop {
            let page = match self.fetch_page(&url, &token, count).await {
                Err(QueryError::QueryExecution { code, message })
                    if code.as_deref() == Some("InvalidAuthenticationToken") =>
                {
                    self.tokens.invalidate(tenant_id, client_id);
                    return Err(QueryError::QueryExecution { code, message });
                }
                other => other?,
            };
            pages += 1;

            if total_count.is_none() {
                total_count = page.count;
            }
            rows.extend(page.value.into_iter().map(into_row));

            if let Some(max) = options.max_records {
                if rows.len() >= max {
                    rows.truncate(max);
                    debug!(pages, rows = rows.len(), "Reached max records, stopping pagination");
                    return Ok(raw_result(rows, total_count, page.next_link));
                }
            }

            match page.next_link {
                Some(next) => url = next,
                None => {
                    debug!(pages, rows = rows.len(), "Graph pagination complete");
                    return Ok(raw_result(rows, total_count, None));
                }
            }
        }
    }
}

#[async_trait]
impl QueryAdapter for GraphAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Graph
    }

    #[instrument(skip(self, query, credentials, options))]
    async fn execute(
        &self,
        query: &BuiltQuery,
        credentials: &Credentials,
        options: &ExecutionOptions,
    ) -> QueryResult<RawResult> {
        let BuiltQuery::Graph(request) = query else {
            return Err(QueryError::configuration(
                "Graph adapter received a non-Graph query",
            ));
        };
        let Credentials::Graph {
            tenant_id,
            client_id,
            client_secret,
        } = credentials
        else {
            return Err(QueryError::credential(
                "Graph adapter requires Graph credentials",
            ));
        };

        let started = Instant::now();
        let timeout = options.timeout;
        let result = tokio::time::timeout(
            timeout,
            self.run(request, tenant_id, client_id, client_secret, options),
        )
        .await
        .map_err(|_| QueryError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            endpoint = %request.endpoint,
            rows = result.count,
            execution_time_ms,
            "Graph request completed"
        );
        Ok(result.with_execution_time_ms(execution_time_ms))
    }
}

fn wants_count(request: &GraphRequest, options: &ExecutionOptions) -> bool {
    request.count || options.include_count
}

fn odata_error(body: &str) -> Option<ODataErrorBody> {
    serde_json::from_str::<ODataError>(body).ok().map(|e| e.error)
}

fn parse_page(body: &str) -> QueryResult<ODataPage> {
    serde_json::from_str(body)
        .map_err(|e| QueryError::execution(format!("Invalid Graph response: {e}")))
}

/// Objects become rows as-is; scalar collection members are wrapped.
fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = Map::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

fn raw_result(rows: Vec<Row>, total_count: Option<u64>, next_link: Option<String>) -> RawResult {
    let mut result = RawResult::new(rows);
    result.total_count = total_count;
    result.next_link = next_link;
    result
}
