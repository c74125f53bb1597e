//! Cache key derivation and on-disk path layout
//!
//! Identifiers (usually URLs) become a [`CacheKey`]; keys become fixed-length
//! hex file names. Paths are built only from the hash and a validated
//! directory name, so identifier content can never influence where a file
//! lands outside the cache root.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Stable key identifying one cached blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for CacheKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a cache key from an arbitrary identifier.
///
/// Identifiers that parse as absolute URLs with a host are keyed by their
/// normalized serialization, so `HTTPS://Example.com` and
/// `https://example.com/` share an entry. Anything else is used verbatim,
/// whitespace included, so a plain identifier is also its own raw key.
/// Empty or whitespace-only identifiers are rejected.
pub fn derive_key(identifier: &str) -> Result<CacheKey> {
    if identifier.trim().is_empty() {
        return Err(CacheError::InvalidIdentifier(
            "identifier is empty".to_string(),
        ));
    }

    match Url::parse(identifier) {
        Ok(url) if url.has_host() => Ok(key_for_url(&url)),
        _ => Ok(CacheKey(identifier.to_string())),
    }
}

/// Cache key for an already-parsed URL
pub fn key_for_url(url: &Url) -> CacheKey {
    CacheKey(url.as_str().to_string())
}

/// Filesystem-safe file name for a key: lowercase hex SHA-256, always 64 chars
pub fn file_name_for(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Full path of a key's file below `root`, optionally inside `directory`
pub fn path_for(key: &str, root: &Path, directory: Option<&str>) -> Result<PathBuf> {
    Ok(directory_path(root, directory)?.join(file_name_for(key)))
}

/// Resolve the directory holding entries for `directory` below `root`.
///
/// Only plain relative names are accepted (`images`, `thumbs/small`); empty
/// names, `.`/`..` segments and absolute paths are rejected.
pub(crate) fn directory_path(root: &Path, directory: Option<&str>) -> Result<PathBuf> {
    let Some(directory) = directory else {
        return Ok(root.to_path_buf());
    };

    let relative = Path::new(directory);
    let mut components = relative.components().peekable();
    if components.peek().is_none() {
        return Err(CacheError::InvalidDirectory(
            "directory name is empty".to_string(),
        ));
    }

    let mut resolved = root.to_path_buf();
    for component in components {
        match component {
            Component::Normal(part) => resolved.push(part),
            _ => return Err(CacheError::InvalidDirectory(directory.to_string())),
        }
    }

    Ok(resolved)
}
