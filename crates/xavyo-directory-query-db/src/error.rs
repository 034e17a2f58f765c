//! Error types for the xavyo-directory-query-db crate.

use thiserror::Error;
use xavyo_directory_query::QueryError;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),

    /// A stored row holds a value the engine cannot interpret.
    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::QueryFailed(err)
    }
}

impl From<DbError> for QueryError {
    fn from(err: DbError) -> Self {
        let message = err.to_string();
        QueryError::persistence_with_source(message, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_persistence_error() {
        let err: QueryError = DbError::InvalidRow("backend_type 'x500'".to_string()).into();
        assert!(matches!(err, QueryError::Persistence { .. }));
        assert!(err.to_string().contains("x500"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_sqlx_error_is_query_failure() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DbError::QueryFailed(_)));
    }
}
