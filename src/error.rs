//! Cache Error Types
//!
//! One variant per failure class of the cache subsystem. None of these ever
//! reach callers of the path-resolution operations, which degrade to the
//! original URL instead.

use std::io;
use std::path::PathBuf;

use crate::transport::FetchError;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Image cache error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache directory is missing or cannot be created/listed
    #[error("Cache directory error at {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Transport failed to fetch the image
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Fetched bytes could not be persisted
    #[error("Failed to write cache file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A cached file could not be removed
    #[error("Failed to delete cache file {path:?}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Image alone would exceed the configured quota
    #[error("Image of {size} bytes exceeds the cache quota of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Cache is not ready")]
    NotReady,

    #[error("Cache has been shut down")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Short label for the failure class, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Directory { .. } => "directory",
            CacheError::Fetch { .. } => "fetch",
            CacheError::Write { .. } => "write",
            CacheError::Delete { .. } => "delete",
            CacheError::TooLarge { .. } => "too_large",
            CacheError::NotReady => "not_ready",
            CacheError::Closed => "closed",
            CacheError::Config(_) => "config",
        }
    }
}
