//! Cache types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a [`TieredCache`](crate::TieredCache)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory for the disk tier
    pub cache_dir: PathBuf,
    /// Memory tier capacity in payload bytes; 0 disables the memory tier
    pub memory_capacity_bytes: u64,
    /// Bucket below `cache_dir` used by the cache's disk operations
    pub directory: Option<String>,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity_bytes = bytes;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }
}

/// Defaults to `./cache/blobs`, relative to the working directory. Embedding
/// applications are expected to choose their own root.
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/blobs"),
            memory_capacity_bytes: 64 * 1024 * 1024, // 64MB
            directory: None,
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_entries: u64,
    pub memory_size: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

/// Files and bytes held by the disk tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub files: u64,
    pub total_size: u64,
}
