//! Cache hit/miss accounting

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use super::index::CacheState;

/// Point-in-time view of the cache
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub state: CacheState,
    /// Number of cached files
    pub entries: usize,
    /// Bytes used by cached files
    pub total_size: u64,
    /// Requests served from disk
    pub hits: u64,
    /// Requests that needed a download
    pub misses: u64,
    /// Downloads started
    pub fetches: u64,
    /// Downloads or writes that failed
    pub fetch_failures: u64,
    /// Requests answered with the original URL
    pub fallbacks: u64,
}

impl CacheStats {
    /// Percentage of lookups served from disk
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        debug!(
            state = ?self.state,
            entries = self.entries,
            total_size = self.total_size,
            hits = self.hits,
            misses = self.misses,
            fallbacks = self.fallbacks,
            hit_rate = format!("{:.1}%", self.hit_rate()),
            "Image cache metrics"
        );
    }
}

/// Live counters updated by the engine
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub fetches: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub fallbacks: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, state: CacheState, entries: usize, total_size: u64) -> CacheStats {
        CacheStats {
            state,
            entries,
            total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}
