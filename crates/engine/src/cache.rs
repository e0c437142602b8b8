//! Read cache for values found in SSTables.
//!
//! Backed by [`moka::sync::Cache`], which bounds the entry count and evicts
//! by recency and frequency. The cache is internally synchronized, so the
//! read path fills it through `&self`.

use moka::sync::Cache;

/// Bounded map from key to the live value last read from an SSTable.
#[derive(Debug, Clone)]
pub struct ReadCache {
    /// `None` when caching is disabled.
    inner: Option<Cache<String, Vec<u8>>>,
}

impl ReadCache {
    /// A cache of at most `capacity` entries. `0` disables caching.
    pub fn new(capacity: usize) -> Self {
        let inner = (capacity > 0).then(|| Cache::new(capacity as u64));
        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.as_ref()?.get(key)
    }

    pub fn add(&self, key: &str, value: Vec<u8>) {
        if let Some(cache) = &self.inner {
            cache.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some(cache) = &self.inner {
            cache.invalidate(key);
        }
    }

    /// Entry count after pending evictions and invalidations are applied.
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |cache| {
            cache.run_pending_tasks();
            cache.entry_count() as usize
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
