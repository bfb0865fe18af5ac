//! Test doubles for the storage and transport collaborators

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::storage::{Storage, StoredFile};
use crate::transport::{FetchError, Transport};

struct MemoryFile {
    data: Vec<u8>,
    modified_at: SystemTime,
}

#[derive(Default)]
struct MemoryState {
    dirs: HashSet<PathBuf>,
    files: BTreeMap<PathBuf, MemoryFile>,
    fail_create_dir: bool,
    fail_list_dir: bool,
    fail_write: bool,
    fail_delete: HashSet<String>,
    native_unavailable: bool,
}

/// In-memory file system with failure injection
pub struct MemoryStorage {
    root: PathBuf,
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/mem"),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Place a file (and its directory) as if left by a previous run
    pub fn seed_file(&self, dir: &Path, name: &str, size: usize, modified_at: SystemTime) {
        let mut state = self.state();
        state.dirs.insert(dir.to_path_buf());
        state.files.insert(
            dir.join(name),
            MemoryFile {
                data: vec![0u8; size],
                modified_at,
            },
        );
    }

    pub fn fail_create_dir(&self) {
        self.state().fail_create_dir = true;
    }

    pub fn fail_list_dir(&self) {
        self.state().fail_list_dir = true;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_write = fail;
    }

    /// Make deleting any file with this name fail
    pub fn fail_delete(&self, name: &str) {
        self.state().fail_delete.insert(name.to_string());
    }

    pub fn set_native_unavailable(&self) {
        self.state().native_unavailable = true;
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    /// Sorted names of the files directly inside `dir`
    pub fn file_names(&self, dir: &Path) -> Vec<String> {
        self.state()
            .files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    /// Remove a file behind the cache's back
    pub fn remove_externally(&self, path: &Path) {
        self.state().files.remove(path);
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

fn denied(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, format!("{} denied", what))
}

#[async_trait]
impl Storage for MemoryStorage {
    fn is_native_available(&self) -> bool {
        !self.state().native_unavailable
    }

    fn cache_root_dir(&self) -> PathBuf {
        self.root.clone()
    }

    async fn exists(&self, path: &Path) -> bool {
        let state = self.state();
        state.dirs.contains(path) || state.files.contains_key(path)
    }

    async fn create_dir(&self, path: &Path, replace: bool) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_create_dir {
            return Err(denied("create_dir"));
        }
        if replace {
            state.files.retain(|p, _| !p.starts_with(path));
        }
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> io::Result<Vec<StoredFile>> {
        let state = self.state();
        if state.fail_list_dir {
            return Err(denied("list_dir"));
        }
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        Ok(state
            .files
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, f)| StoredFile {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size: f.data.len() as u64,
                modified_at: f.modified_at,
            })
            .collect())
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.fail_write {
            return Err(denied("write"));
        }
        let parent = path.parent().unwrap_or(Path::new("/"));
        if !state.dirs.contains(parent) {
            return Err(not_found(parent));
        }
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                data: data.to_vec(),
                modified_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let mut state = self.state();
        let file = state.files.remove(src).ok_or_else(|| not_found(src))?;
        state.files.insert(dst.to_path_buf(), file);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if state.fail_delete.contains(&name) {
            return Err(denied("delete"));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.state()
            .files
            .get(path)
            .map(|f| f.data.clone())
            .ok_or_else(|| not_found(path))
    }
}

/// Transport that counts calls and serves zero-filled images
pub struct MockTransport {
    size: usize,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    calls: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            size: 100,
            delay: Duration::ZERO,
            gate: None,
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Bytes returned per image
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every fetch until a permit is added to the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of fetches observed running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Network("connection reset".to_string()));
        }
        Ok(vec![0u8; self.size])
    }
}

/// Poll `condition` until it holds, panicking after a second
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
