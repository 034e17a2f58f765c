//! OAuth2 client-credentials tokens for Microsoft Graph.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use xavyo_directory_query::{QueryError, QueryResult};

/// Token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Clone)]
struct CachedToken {
    access_token: SecretString,
    /// Past this instant the token is replaced rather than reused.
    refresh_at: DateTime<Utc>,
}

impl CachedToken {
    fn usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

/// Identifies the app registration a token was issued to. The secret is
/// kept only as a SHA-256 digest so a different secret never reuses a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TokenKey {
    tenant_id: String,
    client_id: String,
    secret_digest: [u8; 32],
}

impl TokenKey {
    fn new(tenant_id: &str, client_id: &str, client_secret: &SecretString) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            secret_digest: Sha256::digest(client_secret.expose_secret().as_bytes()).into(),
        }
    }
}

/// Access tokens keyed by tenant, client and client secret.
pub struct TokenCache {
    http_client: reqwest::Client,
    login_endpoint: String,
    scope: String,
    tokens: DashMap<TokenKey, CachedToken>,
    /// Refresh this long before expiry.
    grace_period: Duration,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("login_endpoint", &self.login_endpoint)
            .field("scope", &self.scope)
            .field("cached", &self.tokens.len())
            .finish()
    }
}

impl TokenCache {
    /// Create a cache issuing tokens for `{graph_endpoint}/.default`.
    pub fn new(http_client: reqwest::Client, login_endpoint: &str, graph_endpoint: &str) -> Self {
        Self {
            http_client,
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", graph_endpoint.trim_end_matches('/')),
            tokens: DashMap::new(),
            grace_period: Duration::minutes(5),
        }
    }

    /// Get a valid access token, requesting a new one if needed.
    #[instrument(skip(self, client_secret))]
    pub async fn get_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &SecretString,
    ) -> QueryResult<SecretString> {
        let key = TokenKey::new(tenant_id, client_id, client_secret);

        if let Some(token) = self.tokens.get(&key) {
            if token.usable_at(Utc::now()) {
                debug!("Using cached token");
                return Ok(token.access_token.clone());
            }
        }

        debug!("Requesting access token");
        let token = self.acquire_token(tenant_id, client_id, client_secret).await?;
        let access_token = token.access_token.clone();
        self.tokens.insert(key, token);
        Ok(access_token)
    }

    /// Drop every cached token of the app registration so the next call
    /// requests a fresh one.
    pub fn invalidate(&self, tenant_id: &str, client_id: &str) {
        self.tokens
            .retain(|key, _| !(key.tenant_id == tenant_id && key.client_id == client_id));
    }

    async fn acquire_token(
        &self,
        tenant_id: &str,
        client_id: &str,
        client_secret: &SecretString,
    ) -> QueryResult<CachedToken> {
        let token_url = format!("{}/{}/oauth2/v2.0/token", self.login_endpoint, tenant_id);

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| QueryError::credential(format!("Token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(description) => format!("{}: {description}", e.error),
                    None => e.error,
                })
                .unwrap_or(body);
            return Err(QueryError::credential(format!(
                "Token request failed with status {status}: {detail}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            QueryError::credential(format!("Failed to parse token response: {e}"))
        })?;

        debug!(tenant_id, expires_in = token.expires_in, "Token issued");
        Ok(CachedToken {
            access_token: SecretString::from(token.access_token),
            refresh_at: refresh_deadline(Utc::now(), token.expires_in, self.grace_period),
        })
    }
}

/// When a token issued at `issued_at` with lifetime `expires_in` seconds
/// should stop being reused. Lifetimes beyond chrono's range are capped.
fn refresh_deadline(
    issued_at: DateTime<Utc>,
    expires_in: i64,
    grace_period: Duration,
) -> DateTime<Utc> {
    Duration::try_seconds(expires_in.clamp(0, i64::MAX / 1000))
        .and_then(|lifetime| lifetime.checked_sub(&grace_period))
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
