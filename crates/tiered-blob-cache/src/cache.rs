//! Two-tier cache coordinating the memory and disk stores
//!
//! Stores write through to both tiers; lookups read through memory, then
//! disk, promoting disk hits back into memory.

use crate::disk::DiskStore;
use crate::error::Result;
use crate::key::{self, CacheKey};
use crate::memory::MemoryStore;
use crate::types::{CacheConfig, CacheStats, DiskUsage};
use bytes::Bytes;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::fs;
use tokio::runtime::{self, Handle};
use tracing::{debug, info, warn};
use url::Url;

const GENERATION_STRIPES: usize = 64;

/// A memory + disk blob cache.
///
/// Cloning is cheap and clones share both tiers. Every key argument accepts
/// either a [`CacheKey`] from [`TieredCache::derive_key`] or a raw key string.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<Inner>,
}

struct Inner {
    memory: MemoryStore,
    disk: DiskStore,
    /// Bucket used for this cache's disk entries
    directory: Option<String>,
    /// Resolved `cache_dir[/directory]`
    default_dir: PathBuf,
    /// Bumped by every store, remove and clear of a key in the stripe. A
    /// disk read only promotes into memory if its stripe did not move.
    generations: Box<[AtomicU64; GENERATION_STRIPES]>,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl TieredCache {
    /// Create a cache. No I/O happens until the first disk operation.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let default_dir = key::directory_path(&config.cache_dir, config.directory.as_deref())?;

        Ok(Self {
            inner: Arc::new(Inner {
                memory: MemoryStore::new(config.memory_capacity_bytes),
                disk: DiskStore::new(config.cache_dir),
                directory: config.directory,
                default_dir,
                generations: Box::new(std::array::from_fn(|_| AtomicU64::new(0))),
                memory_hits: AtomicU64::new(0),
                disk_hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }

    /// Ensure the cache directories exist
    pub async fn init(&self) -> Result<()> {
        self.inner.disk.init().await?;
        fs::create_dir_all(&self.inner.default_dir).await?;
        Ok(())
    }

    pub fn derive_key(&self, identifier: &str) -> Result<CacheKey> {
        key::derive_key(identifier)
    }

    pub fn key_for_url(&self, url: &Url) -> CacheKey {
        key::key_for_url(url)
    }

    /// Store a blob in memory and on disk.
    ///
    /// The memory tier is populated even if the disk write then fails, but
    /// the call only succeeds once the blob is persisted.
    pub async fn store(&self, key: impl AsRef<str>, data: impl Into<Bytes>) -> Result<()> {
        let key = key.as_ref();
        let data = data.into();

        self.invalidate(key);
        self.inner.memory.put(key, data.clone());
        self.write_disk(key, &data).await
    }

    /// Persist a blob without placing it in the memory tier
    pub async fn store_to_disk_only(
        &self,
        key: impl AsRef<str>,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let data = data.into();
        self.write_disk(key.as_ref(), &data).await
    }

    async fn write_disk(&self, key: &str, data: &Bytes) -> Result<()> {
        self.inner
            .disk
            .write(key, data, self.directory())
            .await
            .inspect_err(|e| warn!(key = %key, error = %e, "Failed to persist blob"))
    }

    /// Look up a blob and hand the result to `completion`.
    ///
    /// `completion` runs exactly once. On a memory hit it runs before this
    /// method returns, on the calling thread. Otherwise the disk read happens
    /// in the background and `completion` runs there: on a task of the
    /// current Tokio runtime, or on a dedicated thread when called outside
    /// one. Disk errors are logged and reported as `None`.
    pub fn lookup<F>(&self, key: impl AsRef<str>, completion: F)
    where
        F: FnOnce(Option<Bytes>) + Send + 'static,
    {
        let key = key.as_ref();
        if let Some(data) = self.memory_hit(key) {
            completion(Some(data));
            return;
        }

        let cache = self.clone();
        let key = key.to_string();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let data = cache.disk_lookup(&key).await;
                    completion(data);
                });
            }
            Err(_) => cache.lookup_on_thread(key, completion),
        }
    }

    fn lookup_on_thread<F>(self, key: String, completion: F)
    where
        F: FnOnce(Option<Bytes>) + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(completion)));
        let worker_slot = slot.clone();

        let spawned = thread::Builder::new()
            .name("tiered-cache-lookup".to_string())
            .spawn(move || {
                let data = match runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt.block_on(self.disk_lookup(&key)),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to start lookup runtime");
                        None
                    }
                };
                if let Some(completion) = take_completion(&worker_slot) {
                    completion(data);
                }
            });

        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn lookup thread");
            if let Some(completion) = take_completion(&slot) {
                completion(None);
            }
        }
    }

    async fn disk_lookup(&self, key: &str) -> Option<Bytes> {
        match self.read_through_disk(key).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached blob from disk");
                None
            }
        }
    }

    /// Read-through lookup as a future, surfacing disk errors
    pub async fn get(&self, key: impl AsRef<str>) -> Result<Option<Bytes>> {
        let key = key.as_ref();
        if let Some(data) = self.memory_hit(key) {
            return Ok(Some(data));
        }
        self.read_through_disk(key).await
    }

    fn memory_hit(&self, key: &str) -> Option<Bytes> {
        let data = self.inner.memory.get(key)?;
        self.inner.memory_hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Memory cache hit");
        Some(data)
    }

    async fn read_through_disk(&self, key: &str) -> Result<Option<Bytes>> {
        let seen = self.generation(key).load(Ordering::SeqCst);
        match self.inner.disk.read(key, self.directory()).await? {
            Some(data) => {
                self.inner.disk_hits.fetch_add(1, Ordering::Relaxed);
                if self.promote(key, data.clone(), seen) {
                    debug!(key = %key, size = data.len(), "Disk cache hit, promoted to memory");
                } else {
                    debug!(key = %key, "Disk cache hit, entry changed during read");
                }
                Ok(Some(data))
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Put a disk read into memory unless the key was stored, removed or
    /// cleared since `seen` was taken.
    fn promote(&self, key: &str, data: Bytes, seen: u64) -> bool {
        let generation = self.generation(key);
        if generation.load(Ordering::SeqCst) != seen {
            return false;
        }

        self.inner.memory.put(key, data);

        // A remove racing the put above may have run its memory removal first
        if generation.load(Ordering::SeqCst) != seen {
            self.inner.memory.remove(key);
            return false;
        }
        true
    }

    fn generation(&self, key: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() % GENERATION_STRIPES as u64) as usize;
        &self.inner.generations[stripe]
    }

    fn invalidate(&self, key: &str) {
        self.generation(key).fetch_add(1, Ordering::SeqCst);
    }

    fn invalidate_all(&self) {
        for generation in self.inner.generations.iter() {
            generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Whether either tier holds the key. Memory is checked first and a
    /// disk-only entry is not promoted.
    pub async fn exists(&self, key: impl AsRef<str>) -> Result<bool> {
        let key = key.as_ref();
        if self.inner.memory.contains(key) {
            return Ok(true);
        }
        self.exists_on_disk(key).await
    }

    pub async fn exists_on_disk(&self, key: impl AsRef<str>) -> Result<bool> {
        self.inner.disk.exists(key.as_ref(), self.directory()).await
    }

    /// Remove from both tiers; only the disk removal can fail
    pub async fn remove(&self, key: impl AsRef<str>) -> Result<()> {
        let key = key.as_ref();
        self.invalidate(key);
        self.inner.memory.remove(key);
        self.inner.disk.remove(key, self.directory()).await
    }

    /// Remove the disk copy only.
    ///
    /// A copy already in memory keeps being served until it is removed or
    /// evicted, but a disk read in flight will not add a new one.
    pub async fn remove_from_disk_only(&self, key: impl AsRef<str>) -> Result<()> {
        let key = key.as_ref();
        self.invalidate(key);
        self.inner.disk.remove(key, self.directory()).await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.invalidate_all();
        self.inner.memory.clear();
        info!("Cleared memory cache");
        self.clear_all_on_disk().await
    }

    pub async fn clear_all_on_disk(&self) -> Result<()> {
        self.invalidate_all();
        self.inner.disk.clear(self.directory()).await
    }

    /// Path of the key's file inside `directory` below the cache root
    pub fn cache_path(&self, key: impl AsRef<str>, directory: &str) -> Result<PathBuf> {
        key::path_for(key.as_ref(), self.inner.disk.root(), Some(directory))
    }

    /// Path of the key's file in this cache's own directory
    pub fn default_cache_path(&self, key: impl AsRef<str>) -> PathBuf {
        self.inner.default_dir.join(key::file_name_for(key.as_ref()))
    }

    pub fn cached_file_name(&self, key: impl AsRef<str>) -> String {
        key::file_name_for(key.as_ref())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.inner.memory.entry_count(),
            memory_size: self.inner.memory.weighted_size(),
            memory_hits: self.inner.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.inner.disk_hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    pub async fn disk_usage(&self) -> Result<DiskUsage> {
        self.inner.disk.usage(self.directory()).await
    }

    fn directory(&self) -> Option<&str> {
        self.inner.directory.as_deref()
    }
}

fn take_completion<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}
