//! Execution history recording.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::QueryResult;
use crate::ids::{HistoryId, UserId};

/// Final state of a recorded execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

impl HistoryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Completed => "completed",
            HistoryStatus::Failed => "failed",
        }
    }
}

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub user_id: Option<UserId>,
    pub query_id: String,
    pub executed_at: DateTime<Utc>,
    /// Parameters as supplied by the caller.
    pub parameters: Map<String, Value>,
    pub status: HistoryStatus,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Result rows, when the engine is configured to store them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_payload: Option<Value>,
}

/// Destination for execution history.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, entry: HistoryEntry) -> QueryResult<HistoryId>;
}

/// In-process history sink.
#[derive(Debug, Default)]
pub struct MemoryHistorySink {
    entries: RwLock<Vec<(HistoryId, HistoryEntry)>>,
}

impl MemoryHistorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded entries, oldest first.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub async fn get(&self, id: HistoryId) -> Option<HistoryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, entry)| entry.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl HistorySink for MemoryHistorySink {
    async fn record(&self, entry: HistoryEntry) -> QueryResult<HistoryId> {
        let id = HistoryId::new();
        self.entries.write().await.push((id, entry));
        Ok(id)
    }
}
