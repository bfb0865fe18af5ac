//! imgcache - disk cache for remote images
//!
//! Resolves image URLs to local files, downloading each image once and
//! keeping the cache directory within its size and age limits.

pub mod cache;
pub mod config;
pub mod error;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheState, CacheStats, ImageCache, Resolution};
pub use config::{CacheConfig, CacheDirectoryType, ImageReturnType};
pub use error::{CacheError, Result};
pub use storage::{LocalStorage, Storage};
pub use transport::{FetchError, HttpTransport, Transport};
