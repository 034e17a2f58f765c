//! PostgreSQL execution history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;
use xavyo_directory_query::{
    HistoryEntry, HistoryId, HistorySink, HistoryStatus, QueryResult, UserId,
};

use crate::error::DbError;

/// A `directory_query_history` row.
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub query_id: String,
    pub executed_at: DateTime<Utc>,
    pub parameters: Value,
    pub status: String,
    pub row_count: i32,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
    pub results_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Convert back to the engine's history entry.
    pub fn into_entry(self) -> Result<(HistoryId, HistoryEntry), DbError> {
        let status = match self.status.as_str() {
            "completed" => HistoryStatus::Completed,
            "failed" => HistoryStatus::Failed,
            other => return Err(DbError::InvalidRow(format!("history status '{other}'"))),
        };
        let parameters = match self.parameters {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(DbError::InvalidRow(format!(
                    "history parameters must be an object, got {other}"
                )))
            }
        };

        Ok((
            HistoryId::from_uuid(self.id),
            HistoryEntry {
                user_id: self.user_id.map(UserId::new),
                query_id: self.query_id,
                executed_at: self.executed_at,
                parameters,
                status,
                row_count: usize::try_from(self.row_count).map_err(|_| {
                    DbError::InvalidRow(format!("history row_count {}", self.row_count))
                })?,
                execution_time_ms: u64::try_from(self.execution_time_ms).map_err(|_| {
                    DbError::InvalidRow(format!(
                        "history execution_time_ms {}",
                        self.execution_time_ms
                    ))
                })?,
                error_message: self.error_message,
                results_payload: self.results_payload,
            },
        ))
    }
}

/// History sink writing to `directory_query_history`.
#[derive(Debug, Clone)]
pub struct PgHistorySink {
    pool: PgPool,
}

impl PgHistorySink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one entry and return its id.
    pub async fn insert(&self, entry: &HistoryEntry) -> Result<Uuid, DbError> {
        let (row_count, execution_time_ms) = count_columns(entry)?;
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO directory_query_history
                (user_id, query_id, executed_at, parameters, status, row_count,
                 execution_time_ms, error_message, results_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(entry.user_id.map(|u| u.as_i64()))
        .bind(&entry.query_id)
        .bind(entry.executed_at)
        .bind(Value::Object(entry.parameters.clone()))
        .bind(entry.status.as_str())
        .bind(row_count)
        .bind(execution_time_ms)
        .bind(entry.error_message.as_deref())
        .bind(entry.results_payload.clone())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Fetch one history row by id.
    pub async fn get(&self, id: HistoryId) -> Result<Option<HistoryRecord>, DbError> {
        let record = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, user_id, query_id, executed_at, parameters, status, row_count,
                   execution_time_ms, error_message, results_payload, created_at
            FROM directory_query_history
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Most recent executions by a user, newest first.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<HistoryRecord>, DbError> {
        let records = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, user_id, query_id, executed_at, parameters, status, row_count,
                   execution_time_ms, error_message, results_payload, created_at
            FROM directory_query_history
            WHERE user_id = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_i64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Delete history older than `before`. Returns the number of rows removed.
    pub async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM directory_query_history WHERE executed_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// `row_count` and `execution_time_ms` as their column types.
fn count_columns(entry: &HistoryEntry) -> Result<(i32, i64), DbError> {
    let row_count = i32::try_from(entry.row_count)
        .map_err(|_| DbError::InvalidRow(format!("row_count {} exceeds INTEGER", entry.row_count)))?;
    let execution_time_ms = i64::try_from(entry.execution_time_ms).map_err(|_| {
        DbError::InvalidRow(format!(
            "execution_time_ms {} exceeds BIGINT",
            entry.execution_time_ms
        ))
    })?;
    Ok((row_count, execution_time_ms))
}

#[async_trait]
impl HistorySink for PgHistorySink {
    #[instrument(skip(self, entry), fields(query_id = %entry.query_id, status = entry.status.as_str()))]
    async fn record(&self, entry: HistoryEntry) -> QueryResult<HistoryId> {
        let id = self.insert(&entry).await?;
        debug!(history_id = %id, "Inserted history row");
        Ok(HistoryId::from_uuid(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(status: &str, parameters: Value) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            user_id: Some(7),
            query_id: "ad_inactive_users".to_string(),
            executed_at: Utc::now(),
            parameters,
            status: status.to_string(),
            row_count: 12,
            execution_time_ms: 340,
            error_message: None,
            results_payload: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_into_entry() {
        let rec = record("completed", json!({"days": 90}));
        let id = rec.id;
        let (history_id, entry) = rec.into_entry().unwrap();

        assert_eq!(history_id.as_uuid(), id);
        assert_eq!(entry.user_id, Some(UserId::new(7)));
        assert_eq!(entry.status, HistoryStatus::Completed);
        assert_eq!(entry.parameters["days"], json!(90));
        assert_eq!(entry.row_count, 12);
        assert_eq!(entry.execution_time_ms, 340);
    }

    #[test]
    fn test_record_rejects_unknown_status() {
        assert!(matches!(
            record("running", json!({})).into_entry(),
            Err(DbError::InvalidRow(_))
        ));
    }

    #[test]
    fn test_record_null_parameters() {
        let (_, entry) = record("failed", Value::Null).into_entry().unwrap();
        assert!(entry.parameters.is_empty());
        assert_eq!(entry.status, HistoryStatus::Failed);
    }

    #[test]
    fn test_record_rejects_negative_counts() {
        let mut rec = record("completed", json!({}));
        rec.row_count = -1;
        assert!(matches!(rec.into_entry(), Err(DbError::InvalidRow(_))));

        let mut rec = record("completed", json!({}));
        rec.execution_time_ms = -5;
        assert!(matches!(rec.into_entry(), Err(DbError::InvalidRow(_))));
    }

    #[test]
    fn test_count_columns_reject_overflow() {
        let (_, mut entry) = record("completed", json!({})).into_entry().unwrap();
        assert_eq!(count_columns(&entry).unwrap(), (12, 340));

        entry.row_count = usize::MAX;
        assert!(matches!(count_columns(&entry), Err(DbError::InvalidRow(_))));

        entry.row_count = 1;
        entry.execution_time_ms = u64::MAX;
        assert!(matches!(count_columns(&entry), Err(DbError::InvalidRow(_))));
    }
}
