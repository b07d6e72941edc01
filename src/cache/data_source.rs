//! Data source cache
//!
//! Name to ID lookups for one resource type. The cache is hydrated from a bulk
//! listing the first time it is needed, and a miss falls back to a single
//! by-name lookup whose result is added to the cache.
//!
//! Hydration holds the write lock for its whole duration, so concurrent
//! callers wait for it instead of hydrating again. A failed or cancelled
//! hydration leaves the cache empty so a later call retries.

use crate::error::{Diagnostics, ExportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Hydration and fallback functions for a data source cache
#[async_trait]
pub trait DataSourceLookup: Send + Sync {
    /// Bulk listing of every name and ID
    async fn hydrate(&self, cancel: &CancellationToken) -> anyhow::Result<HashMap<String, String>>;

    /// Look up one ID by name
    async fn lookup(&self, key: &str, cancel: &CancellationToken) -> anyhow::Result<String>;
}

pub struct DataSourceCache {
    resource_type: String,
    /// `None` until the first hydration and after [`DataSourceCache::close`]
    entries: RwLock<Option<HashMap<String, String>>>,
    lookup: Arc<dyn DataSourceLookup>,
}

impl std::fmt::Debug for DataSourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceCache")
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

impl DataSourceCache {
    pub fn new(resource_type: &str, lookup: Arc<dyn DataSourceLookup>) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            entries: RwLock::new(None),
            lookup,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.as_ref()?.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.as_ref().map_or(0, HashMap::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Hydrate from the bulk listing if the cache has no entries
    pub async fn hydrate_if_empty(&self, cancel: &CancellationToken) -> Result<(), ExportError> {
        let mut entries = self.entries.write().await;
        if entries.as_ref().is_some_and(|e| !e.is_empty()) {
            return Ok(());
        }

        tracing::debug!("Hydrating {} data source cache", self.resource_type);
        let hydrated = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ExportError::Cancelled(format!(
                    "hydration of {} cache",
                    self.resource_type
                )));
            }
            result = self.lookup.hydrate(cancel) => result.map_err(|e| ExportError::HydrationFailure {
                resource_type: self.resource_type.clone(),
                message: format!("{:#}", e),
            })?,
        };

        tracing::info!(
            "Hydrated {} data source cache with {} entries",
            self.resource_type,
            hydrated.len()
        );
        *entries = Some(hydrated);
        Ok(())
    }

    /// Upsert one entry
    pub async fn update(&self, key: &str, value: &str) -> Result<(), ExportError> {
        let mut entries = self.entries.write().await;
        let entries = entries
            .as_mut()
            .ok_or_else(|| ExportError::CacheNotInitialized(self.resource_type.clone()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Resolve a name to an ID, hydrating first and falling back to a point
    /// lookup on a miss
    pub async fn resolve(&self, key: &str, cancel: &CancellationToken) -> Result<String, Diagnostics> {
        self.hydrate_if_empty(cancel).await?;

        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        tracing::debug!("{} cache miss for '{}', looking up", self.resource_type, key);
        let value = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ExportError::Cancelled(format!("lookup of {} '{}'", self.resource_type, key)).into());
            }
            result = self.lookup.lookup(key, cancel) => result.map_err(|e| ExportError::PointLookupFailure {
                resource_type: self.resource_type.clone(),
                key: key.to_string(),
                message: format!("{:#}", e),
            })?,
        };

        self.update(key, &value).await?;
        Ok(value)
    }

    /// Tear the cache down
    pub async fn close(&self) {
        *self.entries.write().await = None;
    }
}

/// Data source caches for a session, created on first use per resource type
#[derive(Debug, Default)]
pub struct DataSourceCacheSet {
    caches: Mutex<HashMap<String, Arc<DataSourceCache>>>,
}

impl DataSourceCacheSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `resource_type`, created with `lookup` if missing
    pub fn get_or_create<F>(&self, resource_type: &str, lookup: F) -> Arc<DataSourceCache>
    where
        F: FnOnce() -> Arc<dyn DataSourceLookup>,
    {
        let mut caches = self.caches.lock();
        Arc::clone(
            caches
                .entry(resource_type.to_string())
                .or_insert_with(|| Arc::new(DataSourceCache::new(resource_type, lookup()))),
        )
    }

    pub fn get(&self, resource_type: &str) -> Option<Arc<DataSourceCache>> {
        self.caches.lock().get(resource_type).cloned()
    }

    pub async fn close_all(&self) {
        let caches: Vec<_> = self.caches.lock().drain().map(|(_, c)| c).collect();
        for cache in caches {
            cache.close().await;
        }
    }
}
