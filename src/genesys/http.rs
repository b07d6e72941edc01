//! HTTP utilities for Genesys Cloud REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate a response body for logging and strip control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = match body.char_indices().nth(MAX_LOG_BODY_LENGTH) {
        Some((end, _)) => format!("{}... [truncated, {} bytes total]", &body[..end], body.len()),
        None => body.to_string(),
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// Non-success response from the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("API request failed: {status}")]
pub struct ApiStatusError {
    pub status: StatusCode,
}

/// Status of the first [`ApiStatusError`] in the error chain
pub fn api_status(error: &anyhow::Error) -> Option<StatusCode> {
    error
        .chain()
        .find_map(|e| e.downcast_ref::<ApiStatusError>())
        .map(|e| e.status)
}

/// HTTP client wrapper for Platform API calls
#[derive(Clone)]
pub struct ApiHttpClient {
    client: Client,
}

impl ApiHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("gcexport/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET with a bearer token
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url).bearer_auth(token)).await
    }

    /// POST a form body with basic auth. Used for the token exchange.
    pub async fn post_form(
        &self,
        url: &str,
        username: &str,
        password: &str,
        form: &[(&str, &str)],
    ) -> Result<Value> {
        tracing::debug!("POST {}", url);
        self.send(
            self.client
                .post(url)
                .basic_auth(username, Some(password))
                .form(form),
        )
        .await
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiStatusError { status }.into());
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Format an API error for display without echoing response details
pub fn format_api_error(error: &anyhow::Error) -> String {
    if let Some(status) = api_status(error) {
        let message = match status {
            StatusCode::UNAUTHORIZED => "Authentication failed. Check the OAuth client ID and secret.",
            StatusCode::FORBIDDEN => "Permission denied. Check the OAuth client's roles.",
            StatusCode::NOT_FOUND => "Resource not found.",
            StatusCode::TOO_MANY_REQUESTS => "Rate limit exceeded. Please try again later.",
            s if s.is_server_error() => {
                "Genesys Cloud service temporarily unavailable. Please try again."
            }
            _ => "Request failed. Check your network connection and try again.",
        };
        return message.to_string();
    }

    let error_str = format!("{:#}", error);

    let sanitized: String = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
