//! Platform API client
//!
//! Combines a token source with the HTTP wrapper and handles the paged list
//! responses (`entities`, `pageNumber`, `pageCount`) most endpoints return.

use super::auth::TokenSource;
use super::http::{api_status, ApiHttpClient};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Default page size for list endpoints
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size the Platform API accepts
const MAX_PAGE_SIZE: u32 = 500;

#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    http: ApiHttpClient,
    token: Arc<dyn TokenSource>,
    page_size: u32,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, token: Arc<dyn TokenSource>) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid API URL '{}'", base_url))?;
        Ok(Self {
            base_url,
            http: ApiHttpClient::new()?,
            token,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Absolute URL for an API path plus query parameters
    pub fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid API path '{}'", path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET a path. A 401 triggers one token refresh and retry.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path, query)?;
        let token = self.token.token().await?;
        match self.http.get(url.as_str(), &token).await {
            Err(e) if api_status(&e) == Some(StatusCode::UNAUTHORIZED) => {
                tracing::debug!("Token rejected, refreshing");
                let token = self.token.refresh().await?;
                self.http.get(url.as_str(), &token).await
            }
            result => result,
        }
    }

    /// GET `<path>/<id>`
    pub async fn get_by_id(&self, path: &str, id: &str) -> Result<Value> {
        let path = format!("{}/{}", path.trim_end_matches('/'), urlencoding::encode(id));
        self.get(&path, &[]).await
    }

    /// Every entity from a paged list endpoint
    pub async fn list_all(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<Value>> {
        self.list_with(path, &[], cancel).await
    }

    /// Every entity from a paged list endpoint, with extra query parameters
    pub async fn list_with(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>> {
        let page_size = self.page_size.to_string();
        let mut entities = Vec::new();
        let mut page_number: u64 = 1;

        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("Listing {} was cancelled", path);
            }

            let page = page_number.to_string();
            let mut params: Vec<(&str, &str)> = vec![("pageSize", page_size.as_str()), ("pageNumber", page.as_str())];
            params.extend_from_slice(query);

            let response = self.get(path, &params).await?;
            let page_entities = match response.get("entities") {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(_) => anyhow::bail!("Unexpected 'entities' in {} response", path),
            };
            let fetched = page_entities.len();
            entities.extend(page_entities);

            let page_count = response.get("pageCount").and_then(Value::as_u64).unwrap_or(1);
            tracing::debug!("{} page {}/{}: {} entities", path, page_number, page_count, fetched);

            if fetched == 0 || page_number >= page_count {
                break;
            }
            page_number += 1;
        }

        Ok(entities)
    }

    /// First entity whose `name_field` equals `name`, using the list
    /// endpoint's `name` query parameter
    pub async fn find_by_name(
        &self,
        path: &str,
        name_field: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>> {
        let entities = self.list_with(path, &[("name", name)], cancel).await?;
        Ok(entities
            .into_iter()
            .find(|e| e.get(name_field).and_then(Value::as_str) == Some(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesys::auth::StaticToken;

    fn client() -> ApiClient {
        ApiClient::new("https://api.mypurecloud.com", Arc::new(StaticToken("t".to_string()))).unwrap()
    }

    #[test]
    fn test_url_building() {
        let url = client()
            .url("/api/v2/routing/queues", &[("pageSize", "25"), ("name", "Sales & Support")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.mypurecloud.com/api/v2/routing/queues?pageSize=25&name=Sales+%26+Support"
        );
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(client().with_page_size(0).page_size(), 1);
        assert_eq!(client().with_page_size(10_000).page_size(), 500);
        assert_eq!(client().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url", Arc::new(StaticToken(String::new()))).is_err());
    }
}
