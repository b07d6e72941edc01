//! In-memory resource cache
//!
//! Holds objects returned by a bulk listing so later single reads do not go
//! back to the API. There is no eviction; the cache lives as long as the
//! operation that owns it.

use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug)]
pub struct ResourceCache<T> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T> Default for ResourceCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ResourceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: T) {
        self.entries.write().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.read().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> Option<T> {
        self.entries.write().remove(key)
    }

    /// Every cached value, in no particular order
    pub fn get_all(&self) -> Vec<T> {
        self.entries.read().values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
