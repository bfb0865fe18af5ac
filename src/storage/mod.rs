//! File-system collaborator
//!
//! The cache engine only touches disk through [`Storage`], so tests and
//! embedders can swap in their own driver.

pub mod local;

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

pub use local::LocalStorage;

/// A file found while listing a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// File name (not full path)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified_at: SystemTime,
}

/// File-system operations used by the cache
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Whether persistent storage exists on this platform at all
    fn is_native_available(&self) -> bool {
        true
    }

    /// Root under which the cache directory is created
    fn cache_root_dir(&self) -> PathBuf;

    async fn exists(&self, path: &Path) -> bool;

    /// Create a directory, first removing it and its contents when `replace` is set
    async fn create_dir(&self, path: &Path, replace: bool) -> io::Result<()>;

    /// List the regular files in a directory
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<StoredFile>>;

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Move a file, replacing any existing file at `dst`
    async fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()>;

    async fn delete_file(&self, path: &Path) -> io::Result<()>;

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
}
