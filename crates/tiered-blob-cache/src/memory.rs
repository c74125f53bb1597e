//! Bounded in-memory tier

use bytes::Bytes;
use moka::sync::Cache;

/// In-process map from cache key to blob, bounded by total payload bytes.
///
/// Eviction is owned by moka; entries may disappear at any time once the
/// capacity is reached. A capacity of zero disables the tier entirely.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Option<Cache<String, Bytes>>,
}

impl MemoryStore {
    pub fn new(capacity_bytes: u64) -> Self {
        if capacity_bytes == 0 {
            return Self { cache: None };
        }

        let cache = Cache::builder()
            .weigher(|_key: &String, value: &Bytes| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(capacity_bytes)
            .build();

        Self { cache: Some(cache) }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.as_ref()?.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache
            .as_ref()
            .map(|cache| cache.contains_key(key))
            .unwrap_or(false)
    }

    pub fn put(&self, key: &str, value: Bytes) {
        if let Some(cache) = &self.cache {
            cache.insert(key.to_string(), value);
        }
    }

    pub fn remove(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(key);
        }
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            cache.run_pending_tasks();
        }
    }

    /// Approximate number of resident entries
    pub fn entry_count(&self) -> u64 {
        self.cache
            .as_ref()
            .map(|cache| cache.entry_count())
            .unwrap_or(0)
    }

    /// Approximate number of payload bytes held
    pub fn weighted_size(&self) -> u64 {
        self.cache
            .as_ref()
            .map(|cache| cache.weighted_size())
            .unwrap_or(0)
    }
}
