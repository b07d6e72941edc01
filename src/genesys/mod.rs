//! Genesys Cloud API interaction module
//!
//! Enumeration and lookup functions backed by the Platform API.
//!
//! # Module Structure
//!
//! - [`auth`] - OAuth client credentials with token caching
//! - [`http`] - HTTP utilities for REST API calls
//! - [`client`] - API client with paginated listing
//! - [`source`] - Resource sources and data source lookups over an API list endpoint
//!
//! # Example
//!
//! ```ignore
//! use gcexport::genesys::{auth::ClientCredentials, client::ApiClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let creds = ClientCredentials::new("mypurecloud.com", "client-id", "secret")?;
//!     let client = ApiClient::new(&api_base_url("mypurecloud.com"), Arc::new(creds))?;
//!     let queues = client.list_all("/api/v2/routing/queues", &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod source;

/// Default environment domain
pub const DEFAULT_DOMAIN: &str = "mypurecloud.com";

/// AWS region name to environment domain
const REGION_DOMAINS: &[(&str, &str)] = &[
    ("us-east-1", "mypurecloud.com"),
    ("us-east-2", "use2.us-gov-pure.cloud"),
    ("us-west-2", "usw2.pure.cloud"),
    ("ca-central-1", "cac1.pure.cloud"),
    ("sa-east-1", "sae1.pure.cloud"),
    ("eu-west-1", "mypurecloud.ie"),
    ("eu-west-2", "euw2.pure.cloud"),
    ("eu-central-1", "mypurecloud.de"),
    ("eu-central-2", "euc2.pure.cloud"),
    ("me-central-1", "mec1.pure.cloud"),
    ("ap-south-1", "aps1.pure.cloud"),
    ("ap-northeast-1", "mypurecloud.jp"),
    ("ap-northeast-2", "apne2.pure.cloud"),
    ("ap-northeast-3", "apne3.pure.cloud"),
    ("ap-southeast-2", "mypurecloud.com.au"),
];

/// Map a region (`eu-west-1`) or a domain (`mypurecloud.ie`) to its domain
pub fn region_domain(region: &str) -> Option<&'static str> {
    let region = region.trim().to_ascii_lowercase();
    REGION_DOMAINS
        .iter()
        .find(|(name, domain)| *name == region || *domain == region)
        .map(|(_, domain)| *domain)
}

/// Known region names
pub fn list_regions() -> Vec<&'static str> {
    REGION_DOMAINS.iter().map(|(name, _)| *name).collect()
}

pub fn api_base_url(domain: &str) -> String {
    format!("https://api.{}", domain)
}

pub fn login_base_url(domain: &str) -> String {
    format!("https://login.{}", domain)
}
