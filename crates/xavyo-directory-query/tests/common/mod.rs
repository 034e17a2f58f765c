//! Common test utilities for xavyo-directory-query integration tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use xavyo_directory_query::{
    async_trait, BackendType, BuiltQuery, CredentialId, CredentialStore, Credentials,
    ExecutionOptions, HistoryEntry, HistoryId, HistorySink, QueryAdapter, QueryError,
    QueryResult, RawResult, Row, StoredCredential, UserId,
};

/// Build a row from a JSON object literal.
pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("row must be a JSON object")
}

/// Test data factory for an AD user entry.
pub fn create_ad_user(sam: &str, last_logon_filetime: i64) -> Row {
    row(json!({
        "dn": format!("CN={sam},OU=Users,DC=corp,DC=local"),
        "sAMAccountName": sam,
        "displayName": format!("Test User {sam}"),
        "lastLogonTimestamp": last_logon_filetime.to_string(),
        "userAccountControl": "512"
    }))
}

/// What the mock adapter does when executed.
#[derive(Clone)]
pub enum MockBehavior {
    Rows(Vec<Row>),
    Fail(fn() -> QueryError),
    Delay(Duration),
}

/// Adapter that records invocations instead of talking to a directory.
pub struct MockAdapter {
    backend: BackendType,
    behavior: MockBehavior,
    calls: AtomicUsize,
    last_query: Mutex<Option<BuiltQuery>>,
    last_username: Mutex<Option<String>>,
}

impl MockAdapter {
    pub fn new(backend: BackendType, behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            backend,
            behavior,
            calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
            last_username: Mutex::new(None),
        })
    }

    pub fn ldap(rows: Vec<Row>) -> Arc<Self> {
        Self::new(BackendType::Ldap, MockBehavior::Rows(rows))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_query(&self) -> Option<BuiltQuery> {
        self.last_query.lock().unwrap().clone()
    }

    pub fn last_username(&self) -> Option<String> {
        self.last_username.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryAdapter for MockAdapter {
    fn backend_type(&self) -> BackendType {
        self.backend
    }

    async fn execute(
        &self,
        query: &BuiltQuery,
        credentials: &Credentials,
        _options: &ExecutionOptions,
    ) -> QueryResult<RawResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(query.clone());
        *self.last_username.lock().unwrap() = credentials.username().map(str::to_string);

        match &self.behavior {
            MockBehavior::Rows(rows) => Ok(RawResult::new(rows.clone())),
            MockBehavior::Fail(make) => Err(make()),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(RawResult::new(Vec::new()))
            }
        }
    }
}

/// History sink that always fails.
pub struct FailingHistorySink {
    pub attempts: AtomicUsize,
}

impl FailingHistorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl HistorySink for FailingHistorySink {
    async fn record(&self, _entry: HistoryEntry) -> QueryResult<HistoryId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(QueryError::persistence("connection refused"))
    }
}

/// Credential store with no rows at all.
pub struct EmptyCredentialStore {
    pub lookups: AtomicUsize,
}

impl EmptyCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CredentialStore for EmptyCredentialStore {
    async fn find_by_id(
        &self,
        _user_id: UserId,
        _credential_id: CredentialId,
    ) -> QueryResult<Option<StoredCredential>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn find_default(
        &self,
        _user_id: UserId,
        _backend: BackendType,
    ) -> QueryResult<Option<StoredCredential>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Tracing layer that keeps every event's level and message.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}
