//! Image Cache Engine
//!
//! Resolves remote image URLs to local file paths. A miss queues a download;
//! the downloaded bytes are stored under the name from [`file_name_for`],
//! recorded in the index and the cache is pruned back under its quota.
//!
//! Path resolution never fails from the caller's point of view: whenever
//! caching is unavailable or a download/write fails the caller gets
//! [`Resolution::Fallback`] with the original URL and loads it from the
//! network itself.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use base64::Engine as _;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, trace, warn};

use super::filename::{self, file_name_for, is_remote_url};
use super::index::{CacheIndex, CacheState, IndexEntry};
use super::queue::FetchQueue;
use super::stats::{CacheStats, Counters};
use crate::config::{CacheConfig, ImageReturnType};
use crate::error::{CacheError, Result};
use crate::storage::{LocalStorage, Storage};
use crate::transport::{HttpTransport, Transport};

/// Outcome of resolving an image URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Image is on disk at this path
    Cached(PathBuf),
    /// Image is not cached; load the original URL instead
    Fallback(String),
}

impl Resolution {
    pub fn is_cached(&self) -> bool {
        matches!(self, Resolution::Cached(_))
    }

    pub fn cached_path(&self) -> Option<&Path> {
        match self {
            Resolution::Cached(path) => Some(path),
            Resolution::Fallback(_) => None,
        }
    }

    /// String to hand to whatever displays the image
    pub fn into_src(self) -> String {
        match self {
            Resolution::Cached(path) => path.to_string_lossy().into_owned(),
            Resolution::Fallback(url) => url,
        }
    }
}

/// Disk-backed image cache
///
/// Cloning is cheap and every clone drives the same cache.
pub struct ImageCache<S = LocalStorage, T = HttpTransport> {
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for ImageCache<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S, T> {
    config: CacheConfig,
    storage: S,
    transport: T,
    /// Directory holding every cached image
    cache_dir: PathBuf,
    /// Lifecycle, observable by requests waiting for indexing to finish
    state: watch::Sender<CacheState>,
    /// Readers see a consistent snapshot; every mutation, including the file
    /// moves and deletes it implies, happens under the write lock
    index: RwLock<CacheIndex>,
    queue: Mutex<FetchQueue<Resolution>>,
    counters: Counters,
}

impl ImageCache<LocalStorage, HttpTransport> {
    /// Cache on the local disk, downloading over HTTP
    pub fn from_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let storage = LocalStorage::new(config.cache_directory_type);
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, storage, transport))
    }
}

impl<S: Storage, T: Transport> ImageCache<S, T> {
    /// Create a cache over the given collaborators
    ///
    /// Nothing touches the disk until [`init`](Self::init) or the first
    /// request.
    pub fn new(config: CacheConfig, storage: S, transport: T) -> Self {
        let cache_dir = storage
            .cache_root_dir()
            .join(&config.cache_directory_name);
        let (state, _) = watch::channel(CacheState::Uninitialized);
        let queue = Mutex::new(FetchQueue::new(config.concurrency));

        Self {
            inner: Arc::new(Inner {
                config,
                storage,
                transport,
                cache_dir,
                state,
                index: RwLock::new(CacheIndex::new()),
                queue,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    pub fn state(&self) -> CacheState {
        *self.inner.state.borrow()
    }

    pub fn storage(&self) -> &S {
        &self.inner.storage
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Index the cache directory
    ///
    /// With `replace` the directory is wiped and recreated. Otherwise
    /// existing files are indexed and expired or over-quota files removed.
    /// On failure caching stays disabled and requests fall back.
    pub async fn init(&self, replace: bool) -> Result<()> {
        self.inner.reindex(replace).await
    }

    /// Local path of an image, downloading it on first use
    pub async fn get_image_path(&self, url: &str) -> Resolution {
        self.inner.resolve(url).await
    }

    /// Warm the cache for an image
    pub async fn preload(&self, url: &str) -> Resolution {
        debug!(url = url, "Preloading image");
        self.inner.resolve(url).await
    }

    /// Source string for displaying an image
    ///
    /// Follows `image_return_type`: a local path, or a base64 `data:` URL.
    /// Falls back to the original URL.
    pub async fn get_image_src(&self, url: &str) -> String {
        let path = match self.inner.resolve(url).await {
            Resolution::Cached(path) => path,
            Resolution::Fallback(url) => return url,
        };

        match self.inner.config.image_return_type {
            ImageReturnType::Uri => path.to_string_lossy().into_owned(),
            ImageReturnType::Base64 => match self.inner.storage.read_file(&path).await {
                Ok(data) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    format!(
                        "data:{};base64,{}",
                        filename::mime_type_for(&name),
                        base64::engine::general_purpose::STANDARD.encode(data)
                    )
                }
                Err(e) => {
                    debug!(url = url, path = %path.display(), error = %e, "Could not read cached image");
                    url.to_string()
                }
            },
        }
    }

    /// Remove one image from the cache
    ///
    /// Indexes the cache first if nothing has yet. Returns whether the image
    /// was cached. The entry is dropped from the index even when deleting the
    /// file fails.
    pub async fn clear_image_cache(&self, url: &str) -> Result<bool> {
        self.inner.remove(url).await
    }

    /// Remove every cached image and start over with an empty directory
    pub async fn clear_cache(&self) -> Result<()> {
        info!(dir = %self.inner.cache_dir.display(), "Clearing image cache");
        self.inner.reindex(true).await
    }

    /// Stop caching
    ///
    /// Queued requests resolve to their original URL at once. Downloads
    /// already running finish but are not stored, and resolve the same way.
    /// Later requests fall back without downloading.
    pub fn shutdown(&self) {
        self.inner.state.send_replace(CacheState::Closed);
        let resolved = self
            .inner
            .lock_queue()
            .close(|url| Resolution::Fallback(url.to_string()));
        info!(resolved = resolved, "Image cache shut down");
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.inner.index.read().await;
        self.inner
            .counters
            .snapshot(self.state(), index.len(), index.total_size())
    }
}

impl<S: Storage, T: Transport> Inner<S, T> {
    async fn resolve(self: &Arc<Self>, url: &str) -> Resolution {
        if !is_remote_url(url) {
            trace!(url = url, "Not a remote URL, passing through");
            return Resolution::Fallback(url.to_string());
        }
        if !self.storage.is_native_available() || !self.ensure_ready().await {
            return self.fallback(url);
        }

        let name = file_name_for(url, &self.config);
        if let Some(path) = self.lookup(&name).await {
            Counters::bump(&self.counters.hits);
            debug!(url = url, file = %name, "Image cache HIT");
            return Resolution::Cached(path);
        }

        Counters::bump(&self.counters.misses);
        debug!(url = url, file = %name, "Image cache MISS, queueing download");

        let receiver = self.lock_queue().enqueue(url);
        let Some(receiver) = receiver else {
            return self.fallback(url);
        };
        self.pump();

        match receiver.await {
            Ok(Resolution::Fallback(_)) | Err(_) => self.fallback(url),
            Ok(cached) => cached,
        }
    }

    fn fallback(&self, url: &str) -> Resolution {
        Counters::bump(&self.counters.fallbacks);
        Resolution::Fallback(url.to_string())
    }

    /// Wait until the index is usable, indexing on first use
    async fn ensure_ready(&self) -> bool {
        let mut state_rx = self.state.subscribe();
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                CacheState::Ready => return true,
                CacheState::Disabled | CacheState::Closed => return false,
                CacheState::Uninitialized => {
                    if self.transition(CacheState::Uninitialized, CacheState::Indexing) {
                        let mut index = self.index.write().await;
                        // An explicit init may have finished while we waited
                        if *self.state.borrow() == CacheState::Indexing {
                            // Failure is recorded in the state
                            let _ = self.rebuild(&mut index, false).await;
                        }
                    }
                }
                CacheState::Indexing => {
                    if state_rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn transition(&self, from: CacheState, to: CacheState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    async fn reindex(&self, replace: bool) -> Result<()> {
        let mut index = self.index.write().await;
        let started = self.state.send_if_modified(|state| {
            if *state == CacheState::Closed {
                false
            } else {
                *state = CacheState::Indexing;
                true
            }
        });
        if !started {
            return Err(CacheError::Closed);
        }
        self.rebuild(&mut index, replace).await
    }

    /// Replace the index with a fresh scan and publish the outcome
    ///
    /// Caller holds the index write lock and has moved the state to Indexing.
    async fn rebuild(&self, index: &mut CacheIndex, replace: bool) -> Result<()> {
        match self.scan(replace).await {
            Ok(fresh) => {
                *index = fresh;
                info!(
                    dir = %self.cache_dir.display(),
                    entries = index.len(),
                    total_size = index.total_size(),
                    "Image cache ready"
                );
                self.transition(CacheState::Indexing, CacheState::Ready);
                Ok(())
            }
            Err(e) => {
                index.clear();
                warn!(dir = %self.cache_dir.display(), error = %e, "Image cache disabled");
                self.transition(CacheState::Indexing, CacheState::Disabled);
                Err(e)
            }
        }
    }

    /// Build an index from the cache directory, creating it if needed
    async fn scan(&self, replace: bool) -> Result<CacheIndex> {
        let dir = &self.cache_dir;

        if replace || !self.storage.exists(dir).await {
            self.storage
                .create_dir(dir, replace)
                .await
                .map_err(|source| CacheError::Directory {
                    path: dir.clone(),
                    source,
                })?;
            return Ok(CacheIndex::new());
        }

        let files = self
            .storage
            .list_dir(dir)
            .await
            .map_err(|source| CacheError::Directory {
                path: dir.clone(),
                source,
            })?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            if filename::is_staging_file(&file.name) {
                debug!(file = %file.name, "Removing stale download");
                self.discard(&dir.join(&file.name)).await;
                continue;
            }
            entries.push(IndexEntry {
                name: file.name,
                modified_at: file.modified_at,
                size: file.size,
            });
        }

        let mut index = CacheIndex::from_entries(entries);

        if let Some(max_age) = self.config.max_age() {
            let expired = index.take_expired(SystemTime::now(), max_age);
            if !expired.is_empty() {
                info!(count = expired.len(), max_age_secs = max_age.as_secs(), "Removing expired images");
                self.delete_victims(&expired).await;
            }
        }
        self.enforce_quota(&mut index).await;

        Ok(index)
    }

    /// Local path for a cached file, if the index has it and it is on disk
    async fn lookup(&self, name: &str) -> Option<PathBuf> {
        if !self.index.read().await.contains(name) {
            return None;
        }

        let path = self.cache_dir.join(name);
        if self.storage.exists(&path).await {
            return Some(path);
        }

        // Removed behind our back; re-check under the write lock since a
        // download may have just put it back
        let mut index = self.index.write().await;
        if !self.storage.exists(&path).await && index.remove(name).is_some() {
            debug!(file = %name, "Cached image missing on disk, dropping entry");
        }
        None
    }

    fn lock_queue(&self) -> MutexGuard<'_, FetchQueue<Resolution>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start downloads for as many queued URLs as there are free slots
    fn pump(self: &Arc<Self>) {
        let admitted: Vec<String> = {
            let mut queue = self.lock_queue();
            let admitted: Vec<String> = std::iter::from_fn(|| queue.next_admission()).collect();
            if !admitted.is_empty() {
                trace!(
                    admitted = admitted.len(),
                    processing = queue.processing_count(),
                    pending = queue.pending_count(),
                    "Admitted downloads"
                );
            }
            admitted
        };

        for url in admitted {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.process(url).await });
        }
    }

    /// Download one admitted URL, publish the outcome and admit the next
    async fn process(self: Arc<Self>, url: String) {
        let outcome = match self.fetch_and_store(&url).await {
            Ok(path) => Resolution::Cached(path),
            Err(e) => {
                Counters::bump(&self.counters.fetch_failures);
                self.report_failure("download", &url, &e);
                Resolution::Fallback(url.clone())
            }
        };

        let resolved = self.lock_queue().complete(&url, outcome);
        trace!(url = %url, waiters = resolved, "Download finished");

        self.pump();
    }

    async fn fetch_and_store(&self, url: &str) -> Result<PathBuf> {
        let name = file_name_for(url, &self.config);

        // Stored by a download that finished after this request missed
        if let Some(path) = self.lookup(&name).await {
            return Ok(path);
        }

        Counters::bump(&self.counters.fetches);
        let data = self
            .transport
            .fetch_bytes(url)
            .await
            .map_err(|source| CacheError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let size = data.len() as u64;
        if let Some(max) = self.config.quota() {
            if size > max {
                return Err(CacheError::TooLarge { size, max });
            }
        }

        let staging = self.cache_dir.join(filename::staging_name(&name));
        self.storage
            .write_file(&staging, &data)
            .await
            .map_err(|source| CacheError::Write {
                path: staging.clone(),
                source,
            })?;

        self.commit(&name, &staging, size).await
    }

    /// Move a downloaded file into place and record it
    async fn commit(&self, name: &str, staging: &Path, size: u64) -> Result<PathBuf> {
        let target = self.cache_dir.join(name);
        let mut index = self.index.write().await;

        let state = *self.state.borrow();
        if state != CacheState::Ready {
            self.discard(staging).await;
            return Err(match state {
                CacheState::Closed => CacheError::Closed,
                _ => CacheError::NotReady,
            });
        }

        if let Err(source) = self.storage.move_file(staging, &target).await {
            self.discard(staging).await;
            return Err(CacheError::Write {
                path: target,
                source,
            });
        }

        index.add(IndexEntry {
            name: name.to_string(),
            modified_at: SystemTime::now(),
            size,
        });
        debug!(file = %name, size = size, total_size = index.total_size(), "Stored image in cache");

        self.enforce_quota(&mut index).await;
        Ok(target)
    }

    /// Evict the oldest images until the cache fits its quota
    async fn enforce_quota(&self, index: &mut CacheIndex) {
        let Some(max) = self.config.quota() else {
            return;
        };
        if !index.is_over_quota(max) {
            return;
        }

        info!(
            total_size = index.total_size(),
            max_size = max,
            "Cache exceeds max size, evicting oldest images"
        );
        let victims = index.take_over_quota(max);
        self.delete_victims(&victims).await;
    }

    /// Delete evicted files, carrying on past individual failures
    async fn delete_victims(&self, victims: &[IndexEntry]) {
        for victim in victims {
            let path = self.cache_dir.join(&victim.name);
            match self.storage.delete_file(&path).await {
                Ok(()) => debug!(file = %victim.name, size = victim.size, "Evicted cached image"),
                Err(source) => {
                    let err = CacheError::Delete { path, source };
                    self.report_failure("evict", &victim.name, &err);
                }
            }
        }
    }

    async fn remove(&self, url: &str) -> Result<bool> {
        if !self.ensure_ready().await {
            return Err(match *self.state.borrow() {
                CacheState::Closed => CacheError::Closed,
                _ => CacheError::NotReady,
            });
        }

        let name = file_name_for(url, &self.config);
        let mut index = self.index.write().await;
        if index.remove(&name).is_none() {
            return Ok(false);
        }

        let path = self.cache_dir.join(&name);
        match self.storage.delete_file(&path).await {
            Ok(()) => {
                debug!(url = url, file = %name, "Removed image from cache");
                Ok(true)
            }
            Err(source) => {
                let err = CacheError::Delete { path, source };
                self.report_failure("remove", url, &err);
                Err(err)
            }
        }
    }

    /// Best-effort removal of a leftover download
    async fn discard(&self, path: &Path) {
        if let Err(e) = self.storage.delete_file(path).await {
            trace!(path = %path.display(), error = %e, "Could not remove staging file");
        }
    }

    /// Log a failed cache operation, loudly only in debug mode
    fn report_failure(&self, operation: &'static str, subject: &str, error: &CacheError) {
        if self.config.debug_mode {
            warn!(operation = operation, subject = subject, kind = error.kind(), error = %error, "Image cache operation failed");
        } else {
            debug!(operation = operation, subject = subject, kind = error.kind(), error = %error, "Image cache operation failed");
        }
    }
}
