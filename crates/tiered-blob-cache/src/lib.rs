//! Two-tier blob cache
//!
//! Blobs are kept in a bounded in-memory tier backed by one file per entry on
//! disk. Keys are derived from caller identifiers (usually URLs) and hashed
//! into fixed-length file names, so any identifier is safe to cache.

mod cache;
mod disk;
mod error;
mod key;
mod memory;
pub mod shared;
mod types;

pub use cache::TieredCache;
pub use disk::DiskStore;
pub use error::{CacheError, Result};
pub use key::{derive_key, file_name_for, key_for_url, path_for, CacheKey};
pub use memory::MemoryStore;
pub use types::{CacheConfig, CacheStats, DiskUsage};
