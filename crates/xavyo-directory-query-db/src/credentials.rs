//! PostgreSQL store for per-user directory credentials.
//!
//! Secrets are stored encrypted; this module never sees plaintext.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use xavyo_directory_query::{
    BackendType, CredentialId, CredentialStore, QueryResult, StoredCredential, UserId,
};

use crate::error::DbError;

/// A `user_directory_credentials` row.
#[derive(Clone, FromRow)]
pub struct CredentialRecord {
    pub id: i64,
    pub user_id: i64,
    pub backend_type: String,
    pub username: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub encrypted_secret: Vec<u8>,
    pub is_default: bool,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("backend_type", &self.backend_type)
            .field("username", &self.username)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("encrypted_secret", &"[REDACTED]")
            .field("is_default", &self.is_default)
            .finish()
    }
}

impl TryFrom<CredentialRecord> for StoredCredential {
    type Error = DbError;

    fn try_from(record: CredentialRecord) -> Result<Self, Self::Error> {
        let backend: BackendType = record.backend_type.parse().map_err(DbError::InvalidRow)?;

        Ok(StoredCredential {
            id: CredentialId::new(record.id),
            user_id: UserId::new(record.user_id),
            backend,
            username: record.username,
            tenant_id: record.tenant_id,
            client_id: record.client_id,
            encrypted_secret: record.encrypted_secret,
            is_default: record.is_default,
        })
    }
}

/// Data for creating a stored credential. The secret must already be
/// encrypted for `user_id`.
#[derive(Clone)]
pub struct NewCredential {
    pub user_id: UserId,
    pub backend: BackendType,
    pub username: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub encrypted_secret: Vec<u8>,
    pub is_default: bool,
}

const SELECT_COLUMNS: &str = "id, user_id, backend_type, username, tenant_id, client_id, \
                              encrypted_secret, is_default";

/// Credential store reading `user_directory_credentials`.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a credential. A new default replaces the user's previous
    /// default for the same backend.
    pub async fn insert(&self, credential: NewCredential) -> Result<CredentialId, DbError> {
        let mut tx = self.pool.begin().await?;

        if credential.is_default {
            sqlx::query(
                r#"
                UPDATE user_directory_credentials
                SET is_default = FALSE, updated_at = NOW()
                WHERE user_id = $1 AND backend_type = $2 AND is_default
                "#,
            )
            .bind(credential.user_id.as_i64())
            .bind(credential.backend.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO user_directory_credentials
                (user_id, backend_type, username, tenant_id, client_id, encrypted_secret, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(credential.user_id.as_i64())
        .bind(credential.backend.as_str())
        .bind(credential.username)
        .bind(credential.tenant_id)
        .bind(credential.client_id)
        .bind(credential.encrypted_secret)
        .bind(credential.is_default)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CredentialId::new(id))
    }

    /// Delete a credential owned by `user_id`. Returns whether a row was removed.
    pub async fn delete(&self, user_id: UserId, id: CredentialId) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM user_directory_credentials WHERE id = $1 AND user_id = $2")
                .bind(id.as_i64())
                .bind(user_id.as_i64())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_one(
        &self,
        sql: &str,
        user_id: UserId,
        key: FetchKey<'_>,
    ) -> Result<Option<StoredCredential>, DbError> {
        let query = sqlx::query_as::<_, CredentialRecord>(sql).bind(user_id.as_i64());
        let query = match key {
            FetchKey::Id(id) => query.bind(id.as_i64()),
            FetchKey::Backend(backend) => query.bind(backend),
        };

        query
            .fetch_optional(&self.pool)
            .await?
            .map(StoredCredential::try_from)
            .transpose()
    }
}

enum FetchKey<'a> {
    Id(CredentialId),
    Backend(&'a str),
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    #[instrument(skip(self))]
    async fn find_by_id(
        &self,
        user_id: UserId,
        credential_id: CredentialId,
    ) -> QueryResult<Option<StoredCredential>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM user_directory_credentials WHERE user_id = $1 AND id = $2"
        );
        Ok(self
            .fetch_one(&sql, user_id, FetchKey::Id(credential_id))
            .await?)
    }

    #[instrument(skip(self))]
    async fn find_default(
        &self,
        user_id: UserId,
        backend: BackendType,
    ) -> QueryResult<Option<StoredCredential>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM user_directory_credentials \
             WHERE user_id = $1 AND backend_type = $2 AND is_default LIMIT 1"
        );
        Ok(self
            .fetch_one(&sql, user_id, FetchKey::Backend(backend.as_str()))
            .await?)
    }
}
