//! Engine configuration parsed from environment variables.

use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::adapter::DEFAULT_TIMEOUT;
use crate::batch::MAX_BATCH_CONCURRENCY;
use crate::credentials::{
    CredentialEncryption, DecryptFailurePolicy, SystemCredentials, DEFAULT_CREDENTIAL_CACHE_TTL,
};
use crate::error::{QueryError, QueryResult};

/// Complete engine configuration.
#[derive(Debug)]
pub struct EngineConfig {
    /// Service account credentials used when no per-user credential applies.
    pub system_credentials: SystemCredentials,
    /// Lifetime of resolved credentials in the cache (default: 5 minutes).
    pub credential_cache_ttl: Duration,
    /// Backend call timeout when the caller sets none (default: 30 seconds).
    pub default_timeout: Duration,
    pub decrypt_failure_policy: DecryptFailurePolicy,
    /// Upper bound for batch concurrency (default and maximum: 10).
    pub max_batch_concurrency: usize,
    /// Store result rows in history entries (default: true).
    pub history_store_results: bool,
    /// Master key for stored per-user credentials.
    pub encryption: Option<CredentialEncryption>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_credentials: SystemCredentials::default(),
            credential_cache_ttl: DEFAULT_CREDENTIAL_CACHE_TTL,
            default_timeout: DEFAULT_TIMEOUT,
            decrypt_failure_policy: DecryptFailurePolicy::default(),
            max_batch_concurrency: MAX_BATCH_CONCURRENCY,
            history_store_results: true,
            encryption: None,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `LDAP_USERNAME` (or `LDAP_BIND_DN`), `LDAP_PASSWORD`
    /// - `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`
    /// - `DIRECTORY_QUERY_CREDENTIAL_CACHE_TTL_SECS` (default: 300)
    /// - `DIRECTORY_QUERY_TIMEOUT_SECS` (default: 30)
    /// - `DIRECTORY_QUERY_DECRYPT_FAILURE_POLICY` (`fallback` | `fail`)
    /// - `DIRECTORY_QUERY_MAX_BATCH_CONCURRENCY` (default: 10)
    /// - `DIRECTORY_QUERY_HISTORY_STORE_RESULTS` (default: true)
    /// - `CREDENTIAL_ENCRYPTION_KEY` (hex, 32 bytes)
    pub fn from_env() -> QueryResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> QueryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let system_credentials = SystemCredentials {
            ldap_username: var("LDAP_USERNAME").or_else(|| var("LDAP_BIND_DN")),
            ldap_password: var("LDAP_PASSWORD").map(SecretString::from),
            graph_tenant_id: var("AZURE_TENANT_ID"),
            graph_client_id: var("AZURE_CLIENT_ID"),
            graph_client_secret: var("AZURE_CLIENT_SECRET").map(SecretString::from),
        };

        let credential_cache_ttl = var("DIRECTORY_QUERY_CREDENTIAL_CACHE_TTL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map_or(DEFAULT_CREDENTIAL_CACHE_TTL, Duration::from_secs);

        let default_timeout = var("DIRECTORY_QUERY_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

        let decrypt_failure_policy = match var("DIRECTORY_QUERY_DECRYPT_FAILURE_POLICY") {
            Some(s) => s
                .parse::<DecryptFailurePolicy>()
                .map_err(QueryError::configuration)?,
            None => DecryptFailurePolicy::default(),
        };

        let max_batch_concurrency = var("DIRECTORY_QUERY_MAX_BATCH_CONCURRENCY")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(MAX_BATCH_CONCURRENCY)
            .clamp(1, MAX_BATCH_CONCURRENCY);

        let history_store_results = var("DIRECTORY_QUERY_HISTORY_STORE_RESULTS")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);

        let encryption = var("CREDENTIAL_ENCRYPTION_KEY")
            .map(|key| CredentialEncryption::from_hex(&key))
            .transpose()?;

        Ok(Self {
            system_credentials,
            credential_cache_ttl,
            default_timeout,
            decrypt_failure_policy,
            max_batch_concurrency,
            history_store_results,
            encryption,
        })
    }

    #[must_use]
    pub fn with_system_credentials(mut self, system_credentials: SystemCredentials) -> Self {
        self.system_credentials = system_credentials;
        self
    }

    #[must_use]
    pub fn with_credential_cache_ttl(mut self, ttl: Duration) -> Self {
        self.credential_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_decrypt_failure_policy(mut self, policy: DecryptFailurePolicy) -> Self {
        self.decrypt_failure_policy = policy;
        self
    }

    #[must_use]
    pub fn with_max_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.max_batch_concurrency = concurrency.clamp(1, MAX_BATCH_CONCURRENCY);
        self
    }

    #[must_use]
    pub fn with_history_store_results(mut self, store: bool) -> Self {
        self.history_store_results = store;
        self
    }

    #[must_use]
    pub fn with_encryption(mut self, encryption: CredentialEncryption) -> Self {
        self.encryption = Some(encryption);
        self
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.credential_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::FallbackToSystem);
        assert_eq!(config.max_batch_concurrency, 10);
        assert!(config.history_store_results);
        assert!(config.encryption.is_none());
        assert!(config.system_credentials.ldap_username.is_none());
    }

    #[test]
    fn test_reads_overrides() {
        let key = "ab".repeat(32);
        let config = EngineConfig::from_lookup(lookup(&[
            ("LDAP_BIND_DN", "CN=svc,DC=corp,DC=local"),
            ("LDAP_PASSWORD", "pw"),
            ("AZURE_TENANT_ID", "tenant"),
            ("AZURE_CLIENT_ID", "client"),
            ("AZURE_CLIENT_SECRET", "secret"),
            ("DIRECTORY_QUERY_CREDENTIAL_CACHE_TTL_SECS", "60"),
            ("DIRECTORY_QUERY_TIMEOUT_SECS", "5"),
            ("DIRECTORY_QUERY_DECRYPT_FAILURE_POLICY", "fail"),
            ("DIRECTORY_QUERY_MAX_BATCH_CONCURRENCY", "4"),
            ("DIRECTORY_QUERY_HISTORY_STORE_RESULTS", "false"),
            ("CREDENTIAL_ENCRYPTION_KEY", key.as_str()),
        ]))
        .unwrap();

        assert_eq!(
            config.system_credentials.ldap_username.as_deref(),
            Some("CN=svc,DC=corp,DC=local")
        );
        assert!(config
            .system_credentials
            .for_backend(crate::definition::BackendType::Graph)
            .is_ok());
        assert_eq!(config.credential_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.default_timeout, Duration::from_secs(5));
        assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Fail);
        assert_eq!(config.max_batch_concurrency, 4);
        assert!(!config.history_store_results);
        assert!(config.encryption.is_some());
    }

    #[test]
    fn test_batch_concurrency_clamped() {
        let config =
            EngineConfig::from_lookup(lookup(&[("DIRECTORY_QUERY_MAX_BATCH_CONCURRENCY", "64")]))
                .unwrap();
        assert_eq!(config.max_batch_concurrency, 10);

        let config = EngineConfig::default().with_max_batch_concurrency(0);
        assert_eq!(config.max_batch_concurrency, 1);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[(
            "DIRECTORY_QUERY_DECRYPT_FAILURE_POLICY",
            "ignore",
        )]))
        .unwrap_err();
        assert!(matches!(err, QueryError::Configuration { .. }));
    }

    #[test]
    fn test_invalid_encryption_key_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("CREDENTIAL_ENCRYPTION_KEY", "abcd")]))
            .unwrap_err();
        assert!(matches!(err, QueryError::Configuration { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LDAP_USERNAME", "svc"),
            ("LDAP_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
