//! Normalised execution results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::Row;
use crate::definition::BackendType;
use crate::ids::HistoryId;

/// Backend and bookkeeping details of an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendType>,

    /// Id of the history row, when history was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_id: Option<HistoryId>,
}

/// Outcome of one query execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub query_id: String,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub data: Vec<Row>,
    pub metadata: ExecutionMetadata,
    /// Set only for failed batch items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// An empty result carrying an error message.
    pub fn failed(
        query_id: impl Into<String>,
        executed_at: DateTime<Utc>,
        execution_time_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            executed_at,
            execution_time_ms,
            row_count: 0,
            data: Vec::new(),
            metadata: ExecutionMetadata::default(),
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serializes_camel_case() {
        let result = ExecutionResult {
            query_id: "graph_guests".to_string(),
            executed_at: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            execution_time_ms: 12,
            row_count: 1,
            data: vec![json!({ "id": "1" }).as_object().cloned().unwrap()],
            metadata: ExecutionMetadata {
                total_count: Some(40),
                backend: Some(BackendType::Graph),
                ..Default::default()
            },
            error: None,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["queryId"], json!("graph_guests"));
        assert_eq!(value["executionTimeMs"], json!(12));
        assert_eq!(value["rowCount"], json!(1));
        assert_eq!(value["metadata"]["totalCount"], json!(40));
        assert_eq!(value["metadata"]["backend"], json!("graph"));
        assert!(value.get("error").is_none());
        assert!(value["metadata"].get("nextLink").is_none());
    }

    #[test]
    fn test_failed_result() {
        let result = ExecutionResult::failed("x", Utc::now(), 3, "query definition 'x' not found");
        assert!(!result.is_success());
        assert!(result.data.is_empty());
        assert_eq!(result.row_count, 0);
    }
}
