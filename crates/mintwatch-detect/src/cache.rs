//! Bounded signature cache.
//!
//! [`SignatureCache`] is the dedup authority for the pipeline: it remembers
//! which unique ids (transaction signatures) have already been seen.
//!
//! # Retention
//!
//! - Entries are only ever added; there is no per-key removal.
//! - When the population exceeds `capacity`, the cache is compacted down to
//!   the `retain` most recently *inserted* ids, oldest first. Lookups do not
//!   refresh an entry; this is a recency window, not an LRU.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

/// Population above which the cache compacts.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Entries kept after compaction.
pub const DEFAULT_RETAIN: usize = 500;

/// Thread-safe recency window of seen ids.
///
/// Can be shared across tasks via `Arc<SignatureCache>`.
#[derive(Debug)]
pub struct SignatureCache {
    inner: Mutex<Window>,
    capacity: usize,
    retain: usize,
    hits: AtomicU64,
    compactions: AtomicU64,
}

#[derive(Debug, Default)]
struct Window {
    members: HashSet<String>,
    /// Insertion order, oldest at the front.
    order: VecDeque<String>,
    inserted: u64,
}

impl SignatureCache {
    /// Create a cache with the default bounds (1000 / 500).
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_CAPACITY, DEFAULT_RETAIN)
    }

    /// Create a cache that compacts to `retain` entries once it holds more than `capacity`.
    ///
    /// `retain` is clamped to `capacity`.
    pub fn with_bounds(capacity: usize, retain: usize) -> Self {
        Self {
            inner: Mutex::new(Window::default()),
            capacity,
            retain: retain.min(capacity),
            hits: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
        }
    }

    /// Check for `id` and insert it in one step.
    ///
    /// Returns `true` if the id was already present (the caller should treat
    /// the event as a duplicate), `false` if this call inserted it.
    ///
    /// The lock is held only for the duration of this call, so two concurrent
    /// callers with the same id can never both see it as absent.
    pub fn contains_or_insert(&self, id: &str) -> bool {
        let mut window = self.inner.lock();

        if window.members.contains(id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        window.members.insert(id.to_string());
        window.order.push_back(id.to_string());
        window.inserted += 1;

        if window.order.len() > self.capacity {
            self.compact(&mut window);
        }

        false
    }

    /// Check for `id` without inserting it.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().members.contains(id)
    }

    /// Insert `id` if absent. Equivalent to [`contains_or_insert`](Self::contains_or_insert)
    /// with the answer discarded.
    pub fn insert(&self, id: &str) {
        let _ = self.contains_or_insert(id);
    }

    /// Number of ids currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the cache.
    pub fn stats(&self) -> CacheStats {
        let window = self.inner.lock();
        CacheStats {
            entries: window.order.len(),
            inserted: window.inserted,
            hits: self.hits.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }

    /// Drop the oldest entries until only `retain` remain.
    fn compact(&self, window: &mut Window) {
        let excess = window.order.len() - self.retain;
        for id in window.order.drain(..excess) {
            window.members.remove(&id);
        }
        self.compactions.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Signature cache compacted: dropped {} oldest, kept {}",
            excess,
            window.order.len()
        );
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the signature cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Ids currently held.
    pub entries: usize,
    /// Ids ever inserted.
    pub inserted: u64,
    /// Lookups that found the id already present.
    pub hits: u64,
    /// Number of compactions performed.
    pub compactions: u64,
}
