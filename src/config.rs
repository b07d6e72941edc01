//! Configuration Management
//!
//! Persistent settings for gcexport, stored as JSON under the user's config
//! directory. Environment variables override the file, and CLI flags
//! override both.

use crate::genesys::{self, client::DEFAULT_PAGE_SIZE};
use crate::resource::sanitizer::Strategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const REGION_ENV: &str = "GENESYSCLOUD_REGION";
pub const API_URL_ENV: &str = "GENESYSCLOUD_API_URL";
pub const CLIENT_ID_ENV: &str = "GENESYSCLOUD_OAUTHCLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "GENESYSCLOUD_OAUTHCLIENT_SECRET";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Region name (`eu-west-1`) or environment domain (`mypurecloud.ie`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Overrides the API base URL derived from the region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Overrides the login base URL derived from the region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    /// Only read from the environment, never written to disk
    #[serde(skip)]
    pub oauth_client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_filter: Vec<String>,
    /// `type_regex.attribute` entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub decode_json_attributes: bool,
}

impl Config {
    /// Default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcexport").join("config.json"))
    }

    /// Load from the default path, then apply environment overrides
    pub fn load() -> Self {
        let config = match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                tracing::warn!("Ignoring config file {:?}: {:#}", path, e);
                Self::default()
            }),
            _ => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    /// Save to the default path
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Apply overrides from an environment lookup. Empty values are ignored.
    pub fn with_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(region) = var(REGION_ENV) {
            self.region = Some(region);
        }
        if let Some(url) = var(API_URL_ENV) {
            self.api_url = Some(url);
        }
        if let Some(id) = var(CLIENT_ID_ENV) {
            self.oauth_client_id = Some(id);
        }
        if let Some(secret) = var(CLIENT_SECRET_ENV) {
            self.oauth_client_secret = Some(secret);
        }
        if let Some(strategy) = Strategy::from_env_with(&env) {
            self.strategy = Some(strategy);
        }
        self
    }

    /// Environment domain (CLI > config > default)
    pub fn effective_domain(&self) -> Result<String> {
        match self.region.as_deref() {
            None => Ok(genesys::DEFAULT_DOMAIN.to_string()),
            Some(region) => genesys::region_domain(region)
                .map(str::to_string)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown region '{}'. Known regions: {}",
                        region,
                        genesys::list_regions().join(", ")
                    )
                }),
        }
    }

    pub fn effective_api_url(&self) -> Result<String> {
        match &self.api_url {
            Some(url) => Ok(url.clone()),
            None => Ok(genesys::api_base_url(&self.effective_domain()?)),
        }
    }

    pub fn effective_login_url(&self) -> Result<String> {
        match &self.login_url {
            Some(url) => Ok(url.clone()),
            None => Ok(genesys::login_base_url(&self.effective_domain()?)),
        }
    }

    pub fn effective_strategy(&self) -> Strategy {
        self.strategy.unwrap_or_default()
    }

    pub fn effective_page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = Config {
            region: Some("us-east-1".to_string()),
            oauth_client_id: Some("from-file".to_string()),
            ..Default::default()
        }
        .with_env_overrides(env(&[
            (REGION_ENV, "eu-west-1"),
            (CLIENT_ID_ENV, ""),
            (CLIENT_SECRET_ENV, "s3cret"),
            ("GENESYS_SANITIZER_OPTIMIZED", "1"),
        ]));

        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.oauth_client_id.as_deref(), Some("from-file"));
        assert_eq!(config.oauth_client_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.effective_strategy(), Strategy::Optimized);
        assert_eq!(config.effective_api_url().unwrap(), "https://api.mypurecloud.ie");
        assert_eq!(config.effective_login_url().unwrap(), "https://login.mypurecloud.ie");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.effective_api_url().unwrap(), "https://api.mypurecloud.com");
        assert_eq!(config.effective_strategy(), Strategy::Legacy);
        assert_eq!(config.effective_page_size(), DEFAULT_PAGE_SIZE);

        let unknown = Config {
            region: Some("mars-north-1".to_string()),
            ..Default::default()
        };
        assert!(unknown.effective_api_url().is_err());

        let explicit = Config {
            region: Some("mars-north-1".to_string()),
            api_url: Some("http://localhost:8080".to_string()),
            ..Default::default()
        };
        assert_eq!(explicit.effective_api_url().unwrap(), "http://localhost:8080");
    }

    #[test]
    fn test_save_and_load_skips_secret() {
        let dir = std::env::temp_dir().join(format!("gcexport-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let config = Config {
            oauth_client_id: Some("id".to_string()),
            oauth_client_secret: Some("secret".to_string()),
            strategy: Some(Strategy::Transliterating),
            exclude_filter: vec!["genesyscloud_user::^test".to_string()],
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("secret"));
        assert!(content.contains("transliterating"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.oauth_client_secret, None);
        assert_eq!(loaded.strategy, Some(Strategy::Transliterating));
        assert_eq!(loaded.exclude_filter, config.exclude_filter);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
