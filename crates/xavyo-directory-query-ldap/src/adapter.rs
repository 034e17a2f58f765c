//! LDAP query adapter
//!
//! One connection per execution: connect, bind, paged search, unbind.

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{
    Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Scope, SearchEntry, SearchOptions,
};
use secrecy::ExposeSecret;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use xavyo_directory_query::definition::LdapScope;
use xavyo_directory_query::{
    BackendType, BuiltQuery, Credentials, ExecutionOptions, LdapSearch, QueryAdapter, QueryError,
    QueryResult, RawResult, Row,
};

use crate::config::LdapAdapterConfig;
use crate::entry::entry_to_row;

/// LDAP result code for invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP result code returned when the server-side size limit is hit.
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Executes LDAP searches against one directory.
#[derive(Debug, Clone)]
pub struct LdapAdapter {
    config: LdapAdapterConfig,
}

impl LdapAdapter {
    /// Create an adapter with the given configuration.
    pub fn new(config: LdapAdapterConfig) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &LdapAdapterConfig {
        &self.config
    }

    /// Open a connection and simple-bind.
    async fn connect(&self, username: &str, password: &str) -> QueryResult<Ldap> {
        let url = &self.config.url;
        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connect_timeout())
            .set_starttls(self.config.use_starttls)
            .set_no_tls_verify(self.config.tls_no_verify);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| {
                QueryError::connection_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        // The driver ends when the connection is unbound or dropped.
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        debug!(bind_dn = %username, "Performing LDAP bind");

        let result = ldap.simple_bind(username, password).await.map_err(|e| {
            QueryError::connection_with_source(format!("LDAP bind failed for {username}"), e)
        })?;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                return Err(QueryError::credential(format!(
                    "LDAP authentication failed for {username}"
                )));
            }
            return Err(QueryError::connection(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        Ok(ldap)
    }

    /// Run the paged search, stopping early at `max_records`.
    async fn search(
        &self,
        ldap: &mut Ldap,
        search: &LdapSearch,
        options: &ExecutionOptions,
    ) -> QueryResult<Vec<Row>> {
        let base = search.base.as_deref().unwrap_or(&self.config.base_dn);
        let attrs: Vec<&str> = if search.attributes.is_empty() {
            vec!["*"]
        } else {
            search.attributes.iter().map(String::as_str).collect()
        };
        let page_size = options.page_size.unwrap_or(self.config.page_size).max(1);

        debug!(
            base = %base,
            filter = %search.filter,
            page_size,
            size_limit = ?search.size_limit,
            "Searching LDAP"
        );

        if let Some(limit) = search.size_limit {
            ldap.with_search_options(
                SearchOptions::new().sizelimit(i32::try_from(limit).unwrap_or(i32::MAX)),
            );
        }

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(i32::try_from(page_size).unwrap_or(i32::MAX))),
        ];

        let mut stream = ldap
            .streaming_search_with(adapters, base, scope(search.scope), &search.filter, attrs)
            .await
            .map_err(|e| map_ldap_error("LDAP search failed", e))?;

        let mut rows = Vec::new();
        loop {
            let entry = match stream.next().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    // A size limit hit mid-stream keeps the rows read so far.
                    stream_error(e)?;
                    return Ok(rows);
                }
            };
            rows.push(entry_to_row(SearchEntry::construct(entry)));
            if options.max_records.is_some_and(|max| rows.len() >= max) {
                debug!(rows = rows.len(), "Reached max records, stopping search");
                return Ok(rows);
            }
        }

        let result = stream.finish().await;
        check_search_result(result)?;
        Ok(rows)
    }

    async fn run(
        &self,
        search: &LdapSearch,
        username: &str,
        password: &str,
        options: &ExecutionOptions,
    ) -> QueryResult<Vec<Row>> {
        let mut ldap = self.connect(username, password).await?;
        let outcome = self.search(&mut ldap, search, options).await;

        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }
        outcome
    }
}

#[async_trait]
impl QueryAdapter for LdapAdapter {
    fn backend_type(&self) -> BackendType {
        BackendType::Ldap
    }

    #[instrument(skip(self, query, credentials, options))]
    async fn execute(
        &self,
        query: &BuiltQuery,
        credentials: &Credentials,
        options: &ExecutionOptions,
    ) -> QueryResult<RawResult> {
        let BuiltQuery::Ldap(search) = query else {
            return Err(QueryError::configuration(
                "LDAP adapter received a non-LDAP query",
            ));
        };
        let Credentials::Ldap { username, password } = credentials else {
            return Err(QueryError::credential(
                "LDAP adapter requires LDAP credentials",
            ));
        };

        let started = Instant::now();
        let timeout = options.timeout;
        let rows = tokio::time::timeout(
            timeout,
            self.run(search, username, password.expose_secret(), options),
        )
        .await
        .map_err(|_| QueryError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })??;

        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(rows = rows.len(), execution_time_ms, "LDAP search completed");

        let total_count = options.include_count.then_some(rows.len() as u64);
        let mut result = RawResult::new(rows).with_execution_time_ms(execution_time_ms);
        result.total_count = total_count;
        Ok(result)
    }
}

fn scope(scope: LdapScope) -> Scope {
    match scope {
        LdapScope::Base => Scope::Base,
        LdapScope::One => Scope::OneLevel,
        LdapScope::Sub => Scope::Subtree,
    }
}

/// Symbolic name of common LDAP result codes.
fn result_code_name(rc: u32) -> Option<&'static str> {
    Some(match rc {
        1 => "operationsError",
        2 => "protocolError",
        3 => "timeLimitExceeded",
        4 => "sizeLimitExceeded",
        11 => "adminLimitExceeded",
        12 => "unavailableCriticalExtension",
        32 => "noSuchObject",
        34 => "invalidDNSyntax",
        49 => "invalidCredentials",
        50 => "insufficientAccessRights",
        51 => "busy",
        52 => "unavailable",
        53 => "unwillingToPerform",
        80 => "other",
        _ => return None,
    })
}

fn result_error(result: &LdapResult) -> QueryError {
    match result.rc {
        // busy / unavailable
        51 | 52 => QueryError::connection(format!(
            "LDAP server unavailable ({}): {}",
            result.rc, result.text
        )),
        RC_INVALID_CREDENTIALS => QueryError::credential(result.text.clone()),
        rc => {
            let code = result_code_name(rc)
                .map_or_else(|| rc.to_string(), str::to_string);
            let message = if result.text.is_empty() {
                format!("LDAP result code {rc}")
            } else {
                result.text.clone()
            };
            QueryError::execution_with_code(code, message)
        }
    }
}

/// Accept success and a server-side size limit; anything else is an error.
fn check_search_result(result: LdapResult) -> QueryResult<()> {
    match result.rc {
        0 => Ok(()),
        RC_SIZE_LIMIT_EXCEEDED => {
            debug!("LDAP size limit reached, returning partial results");
            Ok(())
        }
        _ => Err(result_error(&result)),
    }
}

/// Error raised while reading entries. Result codes are judged the same way
/// as the final search result.
fn stream_error(error: LdapError) -> QueryResult<()> {
    match error {
        LdapError::LdapResult { result } => check_search_result(result),
        other => Err(map_ldap_error("LDAP search failed", other)),
    }
}

fn map_ldap_error(context: &str, error: LdapError) -> QueryError {
    match error {
        LdapError::LdapResult { result } => result_error(&result),
        other => QueryError::connection_with_source(context.to_string(), other),
    }
}
