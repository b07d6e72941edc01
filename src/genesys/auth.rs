//! Genesys Cloud authentication
//!
//! OAuth client credentials grant against `https://login.<domain>/oauth/token`,
//! with the access token cached until shortly before it expires.

use super::http::ApiHttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// TTL used when the token response has no `expires_in`
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Supplies bearer tokens to the API client
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;

    /// Drop any cached token and fetch a new one
    async fn refresh(&self) -> Result<String> {
        self.token().await
    }
}

/// A fixed token, for pre-issued credentials and tests
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// Expiry with the buffer already applied
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// OAuth client credentials with token caching
#[derive(Clone)]
pub struct ClientCredentials {
    http: ApiHttpClient,
    token_url: String,
    client_id: String,
    client_secret: String,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ClientCredentials {
    /// Credentials for the environment at `domain` (e.g. `mypurecloud.com`)
    pub fn new(domain: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        Self::with_login_url(&super::login_base_url(domain), client_id, client_secret)
    }

    /// Credentials against an explicit login base URL
    pub fn with_login_url(login_url: &str, client_id: &str, client_secret: &str) -> Result<Self> {
        if client_id.is_empty() || client_secret.is_empty() {
            anyhow::bail!("OAuth client ID and secret are required");
        }
        Ok(Self {
            http: ApiHttpClient::new()?,
            token_url: format!("{}/oauth/token", login_url.trim_end_matches('/')),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let response = self
            .http
            .post_form(
                &self.token_url,
                &self.client_id,
                &self.client_secret,
                &[("grant_type", "client_credentials")],
            )
            .await
            .context("Failed to get access token")?;

        let response: TokenResponse =
            serde_json::from_value(response).context("Unexpected token response")?;

        let ttl = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        tracing::debug!("New token cached, expires in ~{} minutes", ttl.as_secs() / 60);

        Ok(CachedToken {
            token: response.access_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentials {
    async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref().filter(|c| c.is_valid()) {
            return Ok(cached.token.clone());
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn refresh(&self) -> Result<String> {
        *self.token_cache.write().await = None;
        self.token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_id_and_secret() {
        assert!(ClientCredentials::new("mypurecloud.com", "", "secret").is_err());
        assert!(ClientCredentials::new("mypurecloud.com", "id", "").is_err());

        let creds = ClientCredentials::new("mypurecloud.ie", "id", "secret").unwrap();
        assert_eq!(creds.token_url, "https://login.mypurecloud.ie/oauth/token");
        assert!(!format!("{:?}", creds).contains("secret"));
    }

    #[test]
    fn test_cached_token_validity() {
        let valid = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(valid.is_valid());

        let expired = CachedToken {
            token: "t".to_string(),
            expires_at: Instant::now(),
        };
        assert!(!expired.is_valid());
    }

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticToken("abc".to_string());
        assert_eq!(source.token().await.unwrap(), "abc");
        assert_eq!(source.refresh().await.unwrap(), "abc");
    }
}
