//! Short-lived cache of resolved credentials.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Credentials;
use crate::definition::BackendType;
use crate::ids::{CredentialId, UserId};

/// Default cache TTL (5 minutes).
pub const DEFAULT_CREDENTIAL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Whose credentials a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialScope {
    System,
    User(UserId),
    /// A specific stored credential, as requested by `owner`.
    Credential { owner: UserId, id: CredentialId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: CredentialScope,
    pub backend: BackendType,
}

impl CacheKey {
    #[must_use]
    pub fn new(scope: CredentialScope, backend: BackendType) -> Self {
        Self { scope, backend }
    }
}

#[derive(Debug)]
struct CachedCredentials {
    credentials: Arc<Credentials>,
    /// User the entry belongs to; `None` for system credentials.
    owner: Option<UserId>,
    cached_at: Instant,
}

/// Credential cache: (scope, backend) -> credentials.
///
/// Expiry is checked lazily on read.
#[derive(Debug, Clone)]
pub struct CredentialCache {
    entries: Arc<DashMap<CacheKey, CachedCredentials>>,
    ttl: Duration,
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_CACHE_TTL)
    }
}

impl CredentialCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Get a live entry, evicting it if expired.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Credentials>> {
        if let Some(cached) = self.entries.get(key) {
            if cached.cached_at.elapsed() < self.ttl {
                return Some(Arc::clone(&cached.credentials));
            }
            drop(cached);
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: CacheKey, owner: Option<UserId>, credentials: Arc<Credentials>) {
        self.entries.insert(
            key,
            CachedCredentials {
                credentials,
                owner,
                cached_at: Instant::now(),
            },
        );
    }

    /// Evict every entry owned by `user_id` for `backend`.
    pub fn invalidate(&self, user_id: UserId, backend: BackendType) {
        self.entries
            .retain(|key, cached| !(key.backend == backend && cached.owner == Some(user_id)));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
