//! Error types for the tiered blob cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// The identifier was empty or could not be turned into a key
    InvalidIdentifier(String),
    /// A cache directory name would escape the cache root
    InvalidDirectory(String),
    /// Any filesystem failure other than a missing entry
    Io(Box<std::io::Error>),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidIdentifier(msg) => write!(f, "Invalid identifier: {}", msg),
            CacheError::InvalidDirectory(msg) => write!(f, "Invalid cache directory: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
