//! Graph adapter configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use xavyo_directory_query::{QueryError, QueryResult};

/// Default `$top` when neither the definition nor the caller sets one.
pub const DEFAULT_GRAPH_PAGE_SIZE: u32 = 100;

/// Microsoft cloud the tenant lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphCloud {
    #[default]
    Commercial,
    UsGovernment,
    China,
    Germany,
}

impl GraphCloud {
    #[must_use]
    pub fn login_endpoint(&self) -> &'static str {
        match self {
            GraphCloud::Commercial => "https://login.microsoftonline.com",
            GraphCloud::UsGovernment => "https://login.microsoftonline.us",
            GraphCloud::China => "https://login.chinacloudapi.cn",
            GraphCloud::Germany => "https://login.microsoftonline.de",
        }
    }

    #[must_use]
    pub fn graph_endpoint(&self) -> &'static str {
        match self {
            GraphCloud::Commercial => "https://graph.microsoft.com",
            GraphCloud::UsGovernment => "https://graph.microsoft.us",
            GraphCloud::China => "https://microsoftgraph.chinacloudapi.cn",
            GraphCloud::Germany => "https://graph.microsoft.de",
        }
    }
}

impl FromStr for GraphCloud {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "commercial" | "global" | "public" => Ok(GraphCloud::Commercial),
            "usgovernment" | "usgov" | "gcchigh" => Ok(GraphCloud::UsGovernment),
            "china" => Ok(GraphCloud::China),
            "germany" => Ok(GraphCloud::Germany),
            other => Err(QueryError::configuration(format!(
                "unknown Graph cloud '{other}'"
            ))),
        }
    }
}

/// Configuration for the Graph adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAdapterConfig {
    #[serde(default)]
    pub cloud: GraphCloud,

    /// Overrides the cloud's login endpoint (sovereign proxies, tests).
    #[serde(default)]
    pub login_endpoint: Option<String>,

    /// Overrides the cloud's Graph endpoint.
    #[serde(default)]
    pub graph_endpoint: Option<String>,

    /// `$top` used when the definition has no `top` and the caller no page size.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_page_size() -> u32 {
    DEFAULT_GRAPH_PAGE_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for GraphAdapterConfig {
    fn default() -> Self {
        Self::new(GraphCloud::default())
    }
}

impl GraphAdapterConfig {
    #[must_use]
    pub fn new(cloud: GraphCloud) -> Self {
        Self {
            cloud,
            login_endpoint: None,
            graph_endpoint: None,
            page_size: default_page_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// Point both endpoints at explicit base URLs.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        login_endpoint: impl Into<String>,
        graph_endpoint: impl Into<String>,
    ) -> Self {
        self.login_endpoint = Some(login_endpoint.into());
        self.graph_endpoint = Some(graph_endpoint.into());
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Effective login endpoint, without trailing slash.
    #[must_use]
    pub fn login_endpoint(&self) -> &str {
        self.login_endpoint
            .as_deref()
            .unwrap_or_else(|| self.cloud.login_endpoint())
            .trim_end_matches('/')
    }

    /// Effective Graph endpoint, without trailing slash.
    #[must_use]
    pub fn graph_endpoint(&self) -> &str {
        self.graph_endpoint
            .as_deref()
            .unwrap_or_else(|| self.cloud.graph_endpoint())
            .trim_end_matches('/')
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parse configuration from environment variables.
    ///
    /// Reads:
    /// - `GRAPH_CLOUD` (default: commercial)
    /// - `GRAPH_LOGIN_ENDPOINT`, `GRAPH_ENDPOINT` (optional overrides)
    /// - `GRAPH_PAGE_SIZE` (default: 100)
    pub fn from_env() -> QueryResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> QueryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cloud = match var("GRAPH_CLOUD") {
            Some(value) => value.parse()?,
            None => GraphCloud::default(),
        };

        let config = Self {
            cloud,
            login_endpoint: var("GRAPH_LOGIN_ENDPOINT"),
            graph_endpoint: var("GRAPH_ENDPOINT"),
            page_size: var("GRAPH_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_page_size),
            connect_timeout_secs: default_connect_timeout_secs(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that overridden endpoints are absolute HTTP(S) URLs.
    pub fn validate(&self) -> QueryResult<()> {
        for endpoint in [self.login_endpoint(), self.graph_endpoint()] {
            let url = Url::parse(endpoint).map_err(|e| {
                QueryError::configuration(format!("invalid Graph endpoint '{endpoint}': {e}"))
            })?;
            if !matches!(url.scheme(), "https" | "http") {
                return Err(QueryError::configuration(format!(
                    "Graph endpoint '{endpoint}' must use http(s)"
                )));
            }
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
    fn test_cloud_endpoints() {
        assert_eq!(
            GraphCloud::Commercial.login_endpoint(),
            "https://login.microsoftonline.com"
        );
        assert_eq!(
            GraphCloud::China.graph_endpoint(),
            "https://microsoftgraph.chinacloudapi.cn"
        );
    }

    #[test]
    fn test_cloud_from_str() {
        assert_eq!("US-Government".parse::<GraphCloud>().unwrap(), GraphCloud::UsGovernment);
        assert_eq!("germany".parse::<GraphCloud>().unwrap(), GraphCloud::Germany);
        assert!("mars".parse::<GraphCloud>().is_err());
    }

    #[test]
    fn test_endpoint_override_trims_slash() {
        let config =
            GraphAdapterConfig::default().with_endpoints("http://127.0.0.1:9000/", "http://127.0.0.1:9000/");
        assert_eq!(config.login_endpoint(), "http://127.0.0.1:9000");
        assert_eq!(config.graph_endpoint(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_from_lookup() {
        let config = GraphAdapterConfig::from_lookup(lookup(&[
            ("GRAPH_CLOUD", "china"),
            ("GRAPH_PAGE_SIZE", "250"),
        ]))
        .unwrap();
        assert_eq!(config.cloud, GraphCloud::China);
        assert_eq!(config.page_size, 250);
        assert_eq!(config.graph_endpoint(), "https://microsoftgraph.chinacloudapi.cn");

        let config = GraphAdapterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.cloud, GraphCloud::Commercial);
        assert_eq!(config.page_size, DEFAULT_GRAPH_PAGE_SIZE);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let config = GraphAdapterConfig::default().with_endpoints("ftp://login", "https://graph");
        assert!(config.validate().is_err());
        assert!(GraphAdapterConfig::from_lookup(lookup(&[("GRAPH_CLOUD", "mars")])).is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: GraphAdapterConfig = serde_json::from_str(r#"{"cloud":"us_government"}"#).unwrap();
        assert_eq!(config.cloud, GraphCloud::UsGovernment);
        assert_eq!(config.page_size, DEFAULT_GRAPH_PAGE_SIZE);
        assert!(config.login_endpoint.is_none());
    }
}
