//! Process-wide default cache handle
//!
//! Nothing is global unless asked for: callers that want a shared instance
//! install one explicitly, or get one built from [`CacheConfig::default`] on
//! first use.

use crate::cache::TieredCache;
use crate::error::Result;
use crate::types::CacheConfig;
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing::{info, warn};

lazy_static! {
    static ref SHARED: Mutex<Option<TieredCache>> = Mutex::new(None);
}

/// Install the shared cache. If one is already installed it is kept and
/// returned, and `config` is ignored.
pub fn install(config: CacheConfig) -> Result<TieredCache> {
    let mut shared = SHARED.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = shared.as_ref() {
        warn!("Shared cache already installed, ignoring new configuration");
        return Ok(existing.clone());
    }

    info!(cache_dir = ?config.cache_dir, "Installing shared cache");
    let cache = TieredCache::new(config)?;
    *shared = Some(cache.clone());
    Ok(cache)
}

/// The shared cache, created with the default configuration if none was installed
pub fn global() -> Result<TieredCache> {
    let mut shared = SHARED.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = shared.as_ref() {
        return Ok(existing.clone());
    }

    let config = CacheConfig::default();
    info!(cache_dir = ?config.cache_dir, "Creating default shared cache");
    let cache = TieredCache::new(config)?;
    *shared = Some(cache.clone());
    Ok(cache)
}
