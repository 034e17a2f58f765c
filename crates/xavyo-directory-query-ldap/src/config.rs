//! LDAP adapter configuration
//!
//! Connection settings for the directory server. Bind credentials are not
//! part of the configuration; they are resolved per execution.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;
use xavyo_directory_query::{QueryError, QueryResult};

/// Default number of entries requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Configuration for the LDAP adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapAdapterConfig {
    /// Server URL, `ldap://host[:port]` or `ldaps://host[:port]`.
    pub url: String,

    /// Search base used when a definition does not set one.
    pub base_dn: String,

    /// Upgrade a plain `ldap://` connection with StartTLS.
    #[serde(default)]
    pub use_starttls: bool,

    /// Skip TLS certificate verification (test directories only).
    #[serde(default)]
    pub tls_no_verify: bool,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Simple paged results page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl LdapAdapterConfig {
    /// Create a config with required fields.
    pub fn new(url: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_dn: base_dn.into(),
            use_starttls: false,
            tls_no_verify: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            page_size: default_page_size(),
        }
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `LDAP_URL` (required)
    /// - `LDAP_BASE_DN` (required)
    /// - `LDAP_STARTTLS` (default: false)
    /// - `LDAP_TLS_NO_VERIFY` (default: false)
    /// - `LDAP_CONNECT_TIMEOUT_SECS` (default: 10)
    /// - `LDAP_PAGE_SIZE` (default: 500)
    pub fn from_env() -> QueryResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> QueryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| {
            var(key).is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        };

        let url = var("LDAP_URL")
            .ok_or_else(|| QueryError::configuration("LDAP_URL is required"))?;
        let base_dn = var("LDAP_BASE_DN")
            .ok_or_else(|| QueryError::configuration("LDAP_BASE_DN is required"))?;

        let config = Self {
            url,
            base_dn,
            use_starttls: flag("LDAP_STARTTLS"),
            tls_no_verify: flag("LDAP_TLS_NO_VERIFY"),
            connect_timeout_secs: var("LDAP_CONNECT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_connect_timeout_secs),
            page_size: var("LDAP_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_page_size),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the URL scheme and host, and that TLS options are consistent.
    pub fn validate(&self) -> QueryResult<()> {
        let url = Url::parse(&self.url).map_err(|e| {
            QueryError::configuration(format!("invalid LDAP URL '{}': {e}", self.url))
        })?;

        match url.scheme() {
            "ldap" => {}
            "ldaps" => {
                if self.use_starttls {
                    return Err(QueryError::configuration(
                        "cannot use both ldaps:// and STARTTLS",
                    ));
                }
            }
            other => {
                return Err(QueryError::configuration(format!(
                    "unsupported LDAP URL scheme '{other}'"
                )))
            }
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(QueryError::configuration("LDAP URL has no host"));
        }
        if self.base_dn.trim().is_empty() {
            return Err(QueryError::configuration("base_dn is required"));
        }
        if self.page_size == 0 {
            return Err(QueryError::configuration("page_size must be positive"));
        }
        Ok(())
    }
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
    fn test_from_lookup_defaults() {
        let config = LdapAdapterConfig::from_lookup(lookup(&[
            ("LDAP_URL", "ldaps://dc01.corp.local"),
            ("LDAP_BASE_DN", "DC=corp,DC=local"),
        ]))
        .unwrap();

        assert!(!config.use_starttls);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_starttls() {
        let config = LdapAdapterConfig::from_lookup(lookup(&[
            ("LDAP_URL", "ldap://dc01.corp.local:389"),
            ("LDAP_BASE_DN", "DC=corp,DC=local"),
            ("LDAP_STARTTLS", "true"),
            ("LDAP_PAGE_SIZE", "200"),
        ]))
        .unwrap();

        assert!(config.use_starttls);
        assert_eq!(config.page_size, 200);
    }

    #[test]
    fn test_missing_url_rejected() {
        let err = LdapAdapterConfig::from_lookup(lookup(&[("LDAP_BASE_DN", "DC=corp")])).unwrap_err();
        assert!(err.to_string().contains("LDAP_URL"));
    }

    #[test]
    fn test_validate_scheme_and_tls() {
        assert!(LdapAdapterConfig::new("http://dc01", "DC=corp").validate().is_err());
        assert!(LdapAdapterConfig::new("ldaps://dc01", "DC=corp")
            .with_starttls()
            .validate()
            .is_err());
        assert!(LdapAdapterConfig::new("ldap://dc01", "").validate().is_err());
        assert!(LdapAdapterConfig::new("ldap://dc01", "DC=corp")
            .with_starttls()
            .validate()
            .is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: LdapAdapterConfig = serde_json::from_str(
            r#"{"url":"ldap://dc01.corp.local","base_dn":"DC=corp,DC=local"}"#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }
}
