//! Persistent disk tier
//!
//! One file per entry at `<root>/[<directory>/]<sha256 hex of key>`, holding
//! the raw bytes with no header. Writes go to a temp file in the target
//! directory and are renamed into place, so readers see either the previous
//! content or the new content, never a partial file.

use crate::error::Result;
use crate::key::{directory_path, file_name_for};
use crate::types::DiskUsage;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Blob storage rooted at a cache directory
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the cache root exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(cache_dir = ?self.root, "Disk cache initialized");
        Ok(())
    }

    /// Path where `key` is stored
    pub fn path(&self, key: &str, directory: Option<&str>) -> Result<PathBuf> {
        crate::key::path_for(key, &self.root, directory)
    }

    /// Atomically write `data` as the content for `key`
    pub async fn write(&self, key: &str, data: &[u8], directory: Option<&str>) -> Result<()> {
        let dir = directory_path(&self.root, directory)?;
        fs::create_dir_all(&dir).await?;

        let file_name = file_name_for(key);
        let path = dir.join(&file_name);
        let temp_path = dir.join(temp_file_name(&file_name));

        let written = match write_synced(&temp_path, data).await {
            Ok(()) => fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = ?temp_path, error = %cleanup, "Failed to remove temp file");
                }
            }
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), path = ?path, "Wrote blob to disk");
        Ok(())
    }

    /// Read the content for `key`, `None` if it was never written or was removed
    pub async fn read(&self, key: &str, directory: Option<&str>) -> Result<Option<Bytes>> {
        let path = self.path(key, directory)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str, directory: Option<&str>) -> Result<bool> {
        let path = self.path(key, directory)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the file for `key`; a missing file counts as removed
    pub async fn remove(&self, key: &str, directory: Option<&str>) -> Result<()> {
        let path = self.path(key, directory)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Removed blob from disk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove everything inside the target directory, keeping the directory
    pub async fn clear(&self, directory: Option<&str>) -> Result<()> {
        let dir = directory_path(&self.root, directory)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!(cache_dir = ?dir, removed, "Cleared disk cache");
        Ok(())
    }

    /// Count files and bytes under the target directory, skipping in-flight writes
    pub async fn usage(&self, directory: Option<&str>) -> Result<DiskUsage> {
        let mut usage = DiskUsage::default();
        let mut pending = vec![directory_path(&self.root, directory)?];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() && !is_temp_file(&entry.file_name()) {
                    let metadata = match entry.metadata().await {
                        Ok(metadata) => metadata,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    };
                    usage.files += 1;
                    usage.total_size += metadata.len();
                }
            }
        }

        Ok(usage)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Unique per write so concurrent writers of one key never share a temp file
fn temp_file_name(file_name: &str) -> String {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(".{}.{}.{}{}", file_name, std::process::id(), n, TEMP_SUFFIX)
}

fn is_temp_file(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map(|name| name.starts_with('.') && name.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"hello", None).await.unwrap();

        let data = store.read("k1", None).await.unwrap();
        assert_eq!(data.unwrap(), Bytes::from_static(b"hello"));

        // Raw bytes, no header
        let on_disk = std::fs::read(dir.path().join(file_name_for("k1"))).unwrap();
        assert_eq!(on_disk, b"hello");
    }

    #[tokio::test]
    async fn test_write_creates_missing_directories() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("not").join("yet");
        let store = DiskStore::new(root.clone());

        store.write("k1", b"data", Some("images/large")).await.unwrap();

        let expected = root.join("images").join("large").join(file_name_for("k1"));
        assert!(expected.is_file());
        assert_eq!(store.path("k1", Some("images/large")).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        assert!(store.read("missing", None).await.unwrap().is_none());
        assert!(store.read("missing", Some("sub")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_other_failures_are_io_errors() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        // A directory where the blob file should be
        std::fs::create_dir(dir.path().join(file_name_for("k1"))).unwrap();

        assert!(matches!(
            store.read("k1", None).await,
            Err(CacheError::Io(_))
        ));
        assert!(!store.exists("k1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_empty_payload() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("empty", b"", None).await.unwrap();

        assert!(store.exists("empty", None).await.unwrap());
        assert_eq!(store.read("empty", None).await.unwrap().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_directories_are_separate_buckets() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"a", Some("a")).await.unwrap();
        store.write("k1", b"b", Some("b")).await.unwrap();

        assert_eq!(store.read("k1", Some("a")).await.unwrap().unwrap(), "a");
        assert_eq!(store.read("k1", Some("b")).await.unwrap().unwrap(), "b");
        assert!(!store.exists("k1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_directory() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("root"));

        assert!(matches!(
            store.write("k1", b"data", Some("../outside")).await,
            Err(CacheError::InvalidDirectory(_))
        ));
        assert!(!dir.path().join("outside").exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"hello", None).await.unwrap();
        assert!(store.exists("k1", None).await.unwrap());

        store.remove("k1", None).await.unwrap();
        store.remove("k1", None).await.unwrap();

        assert!(!store.exists("k1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_keeps_directory() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"one", None).await.unwrap();
        store.write("k2", b"two", Some("nested")).await.unwrap();

        store.clear(None).await.unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(!store.exists("k1", None).await.unwrap());
        assert!(!store.exists("k2", Some("nested")).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_subdirectory_only() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"one", None).await.unwrap();
        store.write("k2", b"two", Some("thumbs")).await.unwrap();

        store.clear(Some("thumbs")).await.unwrap();

        assert!(dir.path().join("thumbs").is_dir());
        assert!(!store.exists("k2", Some("thumbs")).await.unwrap());
        assert!(store.exists("k1", None).await.unwrap());

        // Clearing a directory that was never created is fine
        store.clear(Some("never")).await.unwrap();
    }

    #[tokio::test]
    async fn test_usage() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());

        store.write("k1", b"0123456789", None).await.unwrap();
        store.write("k2", b"abcde", Some("nested")).await.unwrap();
        std::fs::write(dir.path().join(".in-flight.1.1.tmp"), b"partial").unwrap();

        let usage = store.usage(None).await.unwrap();
        assert_eq!(usage.files, 2);
        assert_eq!(usage.total_size, 15);

        let nested = store.usage(Some("nested")).await.unwrap();
        assert_eq!(nested.files, 1);
        assert_eq!(nested.total_size, 5);
    }

    #[tokio::test]
    async fn test_concurrent_writes_leave_a_complete_value() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskStore::new(dir.path().to_path_buf()));

        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 256 * 1024]).collect();
        let mut handles = Vec::new();
        for payload in payloads.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write("shared", &payload, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let data = store.read("shared", None).await.unwrap().unwrap();
        assert!(payloads.iter().any(|p| p.as_slice() == &data[..]));

        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| is_temp_file(&e.as_ref().unwrap().file_name()))
            .count();
        assert_eq!(leftovers, 0);
    }
}
