//! Local disk storage
//!
//! Stores cached images under the platform cache (or data) directory.
//! Writes go through a temp file in the target directory and are persisted
//! with a rename, so a crash never leaves a truncated image under its final
//! name.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::{Storage, StoredFile};
use crate::config::CacheDirectoryType;

/// Storage backed by the local file system
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Root directory handed out as the cache root
    root: PathBuf,
}

impl LocalStorage {
    /// Storage rooted at the platform directory for `dir_type`
    pub fn new(dir_type: CacheDirectoryType) -> Self {
        let platform_dir = match dir_type {
            CacheDirectoryType::Cache => dirs::cache_dir(),
            CacheDirectoryType::Data => dirs::data_dir(),
        };
        let root = platform_dir
            .unwrap_or_else(std::env::temp_dir)
            .join("imgcache");

        info!(root = %root.display(), kind = ?dir_type, "Using local image storage");
        Self::with_root(root)
    }

    /// Storage rooted at an explicit directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn cache_root_dir(&self) -> PathBuf {
        self.root.clone()
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir(&self, path: &Path, replace: bool) -> io::Result<()> {
        if replace && fs::try_exists(path).await? {
            debug!(path = %path.display(), "Removing existing directory");
            fs::remove_dir_all(path).await?;
        }
        fs::create_dir_all(path).await
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<StoredFile>> {
        let mut read_dir = fs::read_dir(path).await?;
        let mut files = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Vanished between listing and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(StoredFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified_at: metadata.modified().unwrap_or(UNIX_EPOCH),
            });
        }

        Ok(files)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let path = path.to_path_buf();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let parent = path.parent().unwrap_or(Path::new("."));
            let mut tmp = tempfile::Builder::new()
                .prefix(".tmp")
                .tempfile_in(parent)?;
            tmp.write_all(&data)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst).await
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path).await
    }
}
