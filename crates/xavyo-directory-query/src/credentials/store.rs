//! Lookup of stored per-user directory credentials.

use async_trait::async_trait;

use crate::definition::BackendType;
use crate::error::QueryResult;
use crate::ids::{CredentialId, UserId};

/// A per-user credential row. The secret part stays encrypted until the
/// credential context manager decrypts it.
#[derive(Clone)]
pub struct StoredCredential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub backend: BackendType,
    /// LDAP bind name.
    pub username: Option<String>,
    /// Graph tenant.
    pub tenant_id: Option<String>,
    /// Graph application id.
    pub client_id: Option<String>,
    /// Password or client secret, `nonce || ciphertext || tag`.
    pub encrypted_secret: Vec<u8>,
    pub is_default: bool,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("backend", &self.backend)
            .field("username", &self.username)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("encrypted_secret", &"[REDACTED]")
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Source of stored per-user credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a credential by id. Only credentials owned by `user_id` match.
    async fn find_by_id(
        &self,
        user_id: UserId,
        credential_id: CredentialId,
    ) -> QueryResult<Option<StoredCredential>>;

    /// Find the user's default credential for a backend.
    async fn find_default(
        &self,
        user_id: UserId,
        backend: BackendType,
    ) -> QueryResult<Option<StoredCredential>>;
}
