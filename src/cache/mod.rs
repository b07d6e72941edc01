//! Session caches
//!
//! - [`resource_cache`] - objects already fetched by a bulk listing, keyed by ID
//! - [`data_source`] - lazily hydrated name to ID lookups for one resource type

pub mod data_source;
pub mod resource_cache;

pub use data_source::{DataSourceCache, DataSourceCacheSet, DataSourceLookup};
pub use resource_cache::ResourceCache;
