//! Download admission queue
//!
//! Holds pending image requests in arrival order and admits at most
//! `concurrency` of them at a time. Requests for a URL that is already
//! pending or downloading join the existing item instead of creating a new
//! one, so every caller for that URL gets the outcome of a single download.
//!
//! The queue performs no I/O. Its owner calls `next_admission` to start
//! work and `complete` to publish the outcome, then admits again.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tracing::trace;

/// One requested URL and everyone waiting for it
struct QueueItem<T> {
    url: String,
    waiters: Vec<oneshot::Sender<T>>,
}

/// FIFO admission queue with per-URL de-duplication
pub struct FetchQueue<T> {
    /// Maximum number of URLs processed at once
    concurrency: usize,
    /// Requests not yet admitted, oldest first
    pending: VecDeque<QueueItem<T>>,
    /// Admitted URLs and their waiters
    processing: HashMap<String, Vec<oneshot::Sender<T>>>,
    /// Set once the queue stops accepting work
    closed: bool,
}

impl<T: Clone> FetchQueue<T> {
    /// Create a queue admitting up to `concurrency` URLs at once
    ///
    /// A concurrency of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            pending: VecDeque::new(),
            processing: HashMap::new(),
            closed: false,
        }
    }

    /// Register interest in `url`
    ///
    /// Returns a receiver that yields the outcome of the single download for
    /// this URL, or `None` once the queue is closed.
    pub fn enqueue(&mut self, url: &str) -> Option<oneshot::Receiver<T>> {
        if self.closed {
            return None;
        }

        let (tx, rx) = oneshot::channel();

        if let Some(waiters) = self.processing.get_mut(url) {
            trace!(url = url, "Joining in-flight download");
            waiters.push(tx);
        } else if let Some(item) = self.pending.iter_mut().find(|item| item.url == url) {
            trace!(url = url, "Joining pending download");
            item.waiters.push(tx);
        } else {
            trace!(url = url, pending = self.pending.len() + 1, "Queued download");
            self.pending.push_back(QueueItem {
                url: url.to_string(),
                waiters: vec![tx],
            });
        }

        Some(rx)
    }

    /// Whether another URL can be admitted right now
    pub fn can_process(&self) -> bool {
        self.processing.len() < self.concurrency && !self.pending.is_empty()
    }

    /// Admit the oldest pending URL if a slot is free
    pub fn next_admission(&mut self) -> Option<String> {
        if !self.can_process() {
            return None;
        }

        let item = self.pending.pop_front()?;
        self.processing.insert(item.url.clone(), item.waiters);
        Some(item.url)
    }

    /// Publish the outcome for an admitted URL and free its slot
    ///
    /// Returns how many waiters were resolved. Waiters that stopped
    /// listening are skipped.
    pub fn complete(&mut self, url: &str, outcome: T) -> usize {
        let Some(waiters) = self.processing.remove(url) else {
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    /// Stop accepting requests and resolve everything not yet admitted
    ///
    /// Admitted URLs still finish through `complete`.
    pub fn close(&mut self, fallback: impl Fn(&str) -> T) -> usize {
        self.closed = true;

        let mut resolved = 0;
        for item in self.pending.drain(..) {
            let outcome = fallback(&item.url);
            for waiter in item.waiters {
                let _ = waiter.send(outcome.clone());
                resolved += 1;
            }
        }
        resolved
    }

    /// Number of URLs currently admitted
    pub fn processing_count(&self) -> usize {
        self.processing.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
