//! In-memory index of cached files
//!
//! Derived from a live listing of the cache directory; there is no manifest
//! on disk. Entries are kept oldest write first so eviction walks the front
//! of the list. The index only does bookkeeping: callers delete the backing
//! files of the entries it hands back as eviction victims.

use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Lifecycle of the cache index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing has touched the cache directory yet
    Uninitialized,
    /// Directory is being scanned or recreated
    Indexing,
    /// Index reflects the directory and may be used
    Ready,
    /// Directory could not be created or listed; caching is off
    Disabled,
    /// Cache was shut down
    Closed,
}

/// Tracks one cached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// File name inside the cache directory
    pub name: String,
    /// Write time of the file
    pub modified_at: SystemTime,
    /// Size of the file in bytes
    pub size: u64,
}

/// Ordered record of cached files with a running total size
#[derive(Debug, Default)]
pub struct CacheIndex {
    entries: Vec<IndexEntry>,
    total_size: u64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a directory scan
    ///
    /// Entries are ordered by write time, equal times keeping scan order. A
    /// repeated name keeps its newest write.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let mut entries: Vec<IndexEntry> = entries.into_iter().collect();
        entries.sort_by_key(|e| e.modified_at);

        let mut index = Self::new();
        for entry in entries {
            index.add(entry);
        }
        index
    }

    /// Append an entry as the newest, replacing any entry with the same name
    ///
    /// A write time earlier than the current newest entry (clock rollback,
    /// files restored with future times) is raised to match it, so the list
    /// stays ordered and a fresh entry is never the first to be evicted.
    pub fn add(&mut self, mut entry: IndexEntry) {
        self.remove(&entry.name);
        if let Some(newest) = self.entries.last() {
            entry.modified_at = entry.modified_at.max(newest.modified_at);
        }
        self.total_size += entry.size;
        self.entries.push(entry);
    }

    /// Drop an entry by file name
    pub fn remove(&mut self, name: &str) -> Option<IndexEntry> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        let entry = self.entries.remove(pos);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Drop every entry, returning them
    pub fn clear(&mut self) -> Vec<IndexEntry> {
        self.total_size = 0;
        std::mem::take(&mut self.entries)
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all entry sizes in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Entries, oldest write first
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_over_quota(&self, max_size: u64) -> bool {
        max_size > 0 && self.total_size > max_size
    }

    /// Evict oldest entries until the total fits in `max_size`
    ///
    /// A `max_size` of 0 means no quota. Returns the evicted entries, oldest
    /// first.
    pub fn take_over_quota(&mut self, max_size: u64) -> Vec<IndexEntry> {
        if !self.is_over_quota(max_size) {
            return Vec::new();
        }

        let mut evict = 0;
        let mut remaining = self.total_size;
        while remaining > max_size && evict < self.entries.len() {
            remaining -= self.entries[evict].size;
            evict += 1;
        }

        self.total_size = remaining;
        self.entries.drain(..evict).collect()
    }

    /// Evict every entry written more than `max_age` before `now`
    ///
    /// A zero `max_age` disables age eviction.
    pub fn take_expired(&mut self, now: SystemTime, max_age: Duration) -> Vec<IndexEntry> {
        if max_age.is_zero() {
            return Vec::new();
        }

        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| {
                now.duration_since(e.modified_at)
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            });

        self.entries = kept;
        self.total_size = self.entries.iter().map(|e| e.size).sum();
        expired
    }
}
