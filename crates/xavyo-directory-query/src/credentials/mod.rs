//! Credential context resolution.
//!
//! Decides which secrets authenticate an execution: credentials supplied by
//! the caller, the system (service account) credentials from configuration,
//! or the caller's stored per-user credentials. A missing or unreadable
//! per-user credential falls back to the system credentials.

mod cache;
mod crypto;
mod store;

pub use cache::{CacheKey, CredentialCache, CredentialScope, DEFAULT_CREDENTIAL_CACHE_TTL};
pub use crypto::CredentialEncryption;
pub use store::{CredentialStore, StoredCredential};

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::definition::BackendType;
use crate::error::{QueryError, QueryResult};
use crate::ids::{CredentialId, UserId};

/// Secrets needed to authenticate against one backend.
pub enum Credentials {
    Ldap {
        username: String,
        password: SecretString,
    },
    Graph {
        tenant_id: String,
        client_id: String,
        client_secret: SecretString,
    },
}

impl Credentials {
    pub fn ldap(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Ldap {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn graph(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Credentials::Graph {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }

    #[must_use]
    pub fn backend_type(&self) -> BackendType {
        match self {
            Credentials::Ldap { .. } => BackendType::Ldap,
            Credentials::Graph { .. } => BackendType::Graph,
        }
    }

    /// LDAP bind name, if these are LDAP credentials.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Ldap { username, .. } => Some(username),
            Credentials::Graph { .. } => None,
        }
    }

    /// Whether every field is present and non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self {
            Credentials::Ldap { username, password } => {
                !username.trim().is_empty() && !password.expose_secret().is_empty()
            }
            Credentials::Graph {
                tenant_id,
                client_id,
                client_secret,
            } => {
                !tenant_id.trim().is_empty()
                    && !client_id.trim().is_empty()
                    && !client_secret.expose_secret().is_empty()
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Ldap { username, .. } => f
                .debug_struct("Ldap")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::Graph {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("Graph")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Service account credentials from configuration.
#[derive(Default)]
pub struct SystemCredentials {
    pub ldap_username: Option<String>,
    pub ldap_password: Option<SecretString>,
    pub graph_tenant_id: Option<String>,
    pub graph_client_id: Option<String>,
    pub graph_client_secret: Option<SecretString>,
}

impl SystemCredentials {
    #[must_use]
    pub fn with_ldap(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.ldap_username = Some(username.into());
        self.ldap_password = Some(SecretString::from(password.into()));
        self
    }

    #[must_use]
    pub fn with_graph(
        mut self,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.graph_tenant_id = Some(tenant_id.into());
        self.graph_client_id = Some(client_id.into());
        self.graph_client_secret = Some(SecretString::from(client_secret.into()));
        self
    }

    /// Build the system credentials for `backend`, failing if incomplete.
    pub fn for_backend(&self, backend: BackendType) -> QueryResult<Credentials> {
        let credentials = match backend {
            BackendType::Ldap => Credentials::ldap(
                self.ldap_username.clone().unwrap_or_default(),
                self.ldap_password
                    .as_ref()
                    .map(|p| p.expose_secret().to_string())
                    .unwrap_or_default(),
            ),
            BackendType::Graph => Credentials::graph(
                self.graph_tenant_id.clone().unwrap_or_default(),
                self.graph_client_id.clone().unwrap_or_default(),
                self.graph_client_secret
                    .as_ref()
                    .map(|s| s.expose_secret().to_string())
                    .unwrap_or_default(),
            ),
        };

        if !credentials.is_complete() {
            let required = match backend {
                BackendType::Ldap => "username and password",
                BackendType::Graph => "tenant id, client id and client secret",
            };
            return Err(QueryError::credential(format!(
                "system credentials for {backend} are incomplete: {required} required"
            )));
        }
        Ok(credentials)
    }
}

impl fmt::Debug for SystemCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCredentials")
            .field("ldap_username", &self.ldap_username)
            .field("ldap_password", &self.ldap_password.as_ref().map(|_| "[REDACTED]"))
            .field("graph_tenant_id", &self.graph_tenant_id)
            .field("graph_client_id", &self.graph_client_id)
            .field(
                "graph_client_secret",
                &self.graph_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// What to do when a stored credential cannot be decrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecryptFailurePolicy {
    /// Log and use the system credentials.
    #[default]
    FallbackToSystem,
    /// Fail the execution with a credential error.
    Fail,
}

impl FromStr for DecryptFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fallback" | "fallback_to_system" => Ok(Self::FallbackToSystem),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Unknown decrypt failure policy: {s}")),
        }
    }
}

/// Who is asking for credentials, and how.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub user_id: Option<UserId>,
    pub credential_id: Option<CredentialId>,
    /// Credentials supplied with the request; used as-is.
    pub explicit: Option<Arc<Credentials>>,
    pub use_system_credentials: bool,
}

impl CallerContext {
    #[must_use]
    pub fn system() -> Self {
        Self {
            use_system_credentials: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_credential_id(mut self, credential_id: CredentialId) -> Self {
        self.credential_id = Some(credential_id);
        self
    }

    #[must_use]
    pub fn with_explicit(mut self, credentials: Credentials) -> Self {
        self.explicit = Some(Arc::new(credentials));
        self
    }
}

/// Resolves and caches the credentials for each execution.
pub struct CredentialContextManager {
    system: SystemCredentials,
    store: Option<Arc<dyn CredentialStore>>,
    encryption: Option<CredentialEncryption>,
    cache: CredentialCache,
    decrypt_failure_policy: DecryptFailurePolicy,
}

impl fmt::Debug for CredentialContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialContextManager")
            .field("system", &self.system)
            .field("has_store", &self.store.is_some())
            .field("cached_entries", &self.cache.len())
            .field("decrypt_failure_policy", &self.decrypt_failure_policy)
            .finish()
    }
}

impl CredentialContextManager {
    #[must_use]
    pub fn new(system: SystemCredentials) -> Self {
        Self {
            system,
            store: None,
            encryption: None,
            cache: CredentialCache::default(),
            decrypt_failure_policy: DecryptFailurePolicy::default(),
        }
    }

    /// Enable per-user credentials.
    #[must_use]
    pub fn with_store(
        mut self,
        store: Arc<dyn CredentialStore>,
        encryption: CredentialEncryption,
    ) -> Self {
        self.store = Some(store);
        self.encryption = Some(encryption);
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = CredentialCache::new(ttl);
        self
    }

    #[must_use]
    pub fn with_decrypt_failure_policy(mut self, policy: DecryptFailurePolicy) -> Self {
        self.decrypt_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Resolve the credentials for one execution against `backend`.
    #[instrument(skip(self, caller), fields(backend = %backend, user_id = ?caller.user_id))]
    pub async fn get_credentials(
        &self,
        backend: BackendType,
        caller: &CallerContext,
    ) -> QueryResult<Arc<Credentials>> {
        if let Some(explicit) = self.from_explicit(backend, caller)? {
            debug!("Using caller-supplied credentials");
            return Ok(explicit);
        }

        if let Some(system) = self.from_system(backend, caller)? {
            return Ok(system);
        }

        // from_system returns None only when a user id is present.
        let Some(user_id) = caller.user_id else {
            return self.system_credentials(backend);
        };

        let scope = match caller.credential_id {
            Some(id) => CredentialScope::Credential { owner: user_id, id },
            None => CredentialScope::User(user_id),
        };
        let key = CacheKey::new(scope, backend);
        if let Some(hit) = self.cache.get(&key) {
            debug!(?scope, "Credential cache hit");
            return Ok(hit);
        }
        debug!(?scope, "Credential cache miss");

        match self.from_stored(backend, user_id, caller.credential_id).await? {
            Some(credentials) => {
                let credentials = Arc::new(credentials);
                self.cache
                    .insert(key, Some(user_id), Arc::clone(&credentials));
                Ok(credentials)
            }
            None => {
                warn!(
                    user_id = %user_id,
                    backend = %backend,
                    "No usable per-user credentials, falling back to system credentials"
                );
                self.system_credentials(backend)
            }
        }
    }

    /// Step 1: caller-supplied credentials, returned unchanged.
    pub fn from_explicit(
        &self,
        backend: BackendType,
        caller: &CallerContext,
    ) -> QueryResult<Option<Arc<Credentials>>> {
        let Some(explicit) = &caller.explicit else {
            return Ok(None);
        };
        if explicit.backend_type() != backend {
            return Err(QueryError::credential(format!(
                "supplied credentials are for {} but the query targets {}",
                explicit.backend_type(),
                backend
            )));
        }
        Ok(Some(Arc::clone(explicit)))
    }

    /// Step 2: system credentials when requested or when there is no user.
    pub fn from_system(
        &self,
        backend: BackendType,
        caller: &CallerContext,
    ) -> QueryResult<Option<Arc<Credentials>>> {
        if caller.use_system_credentials || caller.user_id.is_none() {
            return self.system_credentials(backend).map(Some);
        }
        Ok(None)
    }

    /// Step 3: the user's stored credential, decrypted.
    ///
    /// Returns `Ok(None)` when there is nothing usable and the caller should
    /// fall back to system credentials. Lookup errors are logged, not raised.
    pub async fn from_stored(
        &self,
        backend: BackendType,
        user_id: UserId,
        credential_id: Option<CredentialId>,
    ) -> QueryResult<Option<Credentials>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let lookup = match credential_id {
            Some(id) => store.find_by_id(user_id, id).await,
            None => store.find_default(user_id, backend).await,
        };

        let stored = match lookup {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(user_id = %user_id, ?credential_id, "No stored credential found");
                return Ok(None);
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Stored credential lookup failed");
                return Ok(None);
            }
        };

        if stored.backend != backend {
            warn!(
                credential_id = %stored.id,
                stored_backend = %stored.backend,
                backend = %backend,
                "Stored credential is for a different backend"
            );
            return Ok(None);
        }

        match self.decrypt_stored(&stored) {
            Ok(credentials) if credentials.is_complete() => Ok(Some(credentials)),
            Ok(_) => {
                warn!(credential_id = %stored.id, "Stored credential is incomplete");
                Ok(None)
            }
            Err(e) => match self.decrypt_failure_policy {
                DecryptFailurePolicy::FallbackToSystem => {
                    warn!(credential_id = %stored.id, error = %e, "Stored credential could not be decrypted");
                    Ok(None)
                }
                DecryptFailurePolicy::Fail => Err(QueryError::credential(format!(
                    "stored credential {} could not be decrypted: {e}",
                    stored.id
                ))),
            },
        }
    }

    fn decrypt_stored(&self, stored: &StoredCredential) -> QueryResult<Credentials> {
        let encryption = self
            .encryption
            .as_ref()
            .ok_or_else(|| QueryError::credential("no credential encryption key configured"))?;
        let secret = encryption.decrypt_string(stored.user_id, &stored.encrypted_secret)?;

        Ok(match stored.backend {
            BackendType::Ldap => {
                Credentials::ldap(stored.username.clone().unwrap_or_default(), secret)
            }
            BackendType::Graph => Credentials::graph(
                stored.tenant_id.clone().unwrap_or_default(),
                stored.client_id.clone().unwrap_or_default(),
                secret,
            ),
        })
    }

    fn system_credentials(&self, backend: BackendType) -> QueryResult<Arc<Credentials>> {
        let key = CacheKey::new(CredentialScope::System, backend);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let credentials = Arc::new(self.system.for_backend(backend)?);
        self.cache.insert(key, None, Arc::clone(&credentials));
        Ok(credentials)
    }

    /// Evict cached credentials of `user_id` for `backend`.
    pub fn invalidate(&self, user_id: UserId, backend: BackendType) {
        debug!(user_id = %user_id, backend = %backend, "Invalidating cached credentials");
        self.cache.invalidate(user_id, backend);
    }

    /// Drop every cached credential.
    pub fn clear(&self) {
        self.cache.clear();
    }
}
