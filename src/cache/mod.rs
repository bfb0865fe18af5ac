//! Image caching layer
//!
//! Maps image URLs to files in a cache directory, keeps an in-memory index
//! of what is stored and downloads misses through a bounded queue.

pub mod engine;
pub mod filename;
pub mod index;
pub mod queue;
pub mod stats;

pub use engine::{ImageCache, Resolution};
pub use filename::file_name_for;
pub use index::{CacheIndex, CacheState, IndexEntry};
pub use queue::FetchQueue;
pub use stats::CacheStats;
