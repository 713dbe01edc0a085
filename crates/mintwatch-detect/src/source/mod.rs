//! Ingestion sources feeding the coordinator.
//!
//! Both paths produce [`DetectionEvent`](mintwatch_core::DetectionEvent)s and
//! hand them to the **same** [`Coordinator::submit`](crate::Coordinator::submit),
//! which owns the signature cache. Neither path knows about the other.
//!
//! ```text
//! ┌──────────────────┐       ┌──────────────────┐
//! │   Push webhook   │       │   Poll ingestor  │
//! │  (PushIngestor)  │       │    (periodic)    │
//! └────────┬─────────┘       └────────┬─────────┘
//!          │ DetectionEvent           │ DetectionEvent
//!          └──────────┬───────────────┘
//!                     ▼
//!          ┌──────────────────────────┐
//!          │       Coordinator        │
//!          │ (dedupe + gate + action) │
//!          └──────────────────────────┘
//! ```

mod poll;
mod push;

pub use poll::{CycleReport, PollIngestor};
pub use push::{PushIngestor, PushTransport};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters shared between an ingestor and the coordinator.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicUsize,
    submitted: AtomicUsize,
    duplicates: AtomicUsize,
    ignored: AtomicUsize,
    malformed: AtomicUsize,
    cycles: AtomicUsize,
    failed_cycles: AtomicUsize,
    fetch_errors: AtomicUsize,
}

impl IngestStats {
    pub(crate) fn record_received(&self, n: usize) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_submission(&self, duplicate: bool) {
        if duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.submitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self, ok: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> SourceStats {
        let cycles = self.cycles.load(Ordering::Relaxed);
        SourceStats {
            total_events: self.received.load(Ordering::Relaxed),
            submitted_events: self.submitted.load(Ordering::Relaxed),
            duplicate_events: self.duplicates.load(Ordering::Relaxed),
            ignored_events: self.ignored.load(Ordering::Relaxed),
            malformed_events: self.malformed.load(Ordering::Relaxed),
            source_metadata: SourceMetadata {
                poll_cycles: (cycles > 0).then_some(cycles),
                failed_cycles: (cycles > 0).then(|| self.failed_cycles.load(Ordering::Relaxed)),
                fetch_errors: (cycles > 0).then(|| self.fetch_errors.load(Ordering::Relaxed)),
            },
        }
    }
}

/// Statistics for one ingestion path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Notifications or activity records seen (before filtering).
    pub total_events: usize,

    /// Events that reached the coordinator as first sightings.
    pub submitted_events: usize,

    /// Events the coordinator discarded as already seen.
    pub duplicate_events: usize,

    /// Input that was well-formed but not relevant (wrong type, failed tx, not running).
    pub ignored_events: usize,

    /// Input that could not be interpreted.
    pub malformed_events: usize,

    /// Path-specific metadata.
    pub source_metadata: SourceMetadata,
}

/// Path-specific metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    /// For the poller: cycles run.
    pub poll_cycles: Option<usize>,

    /// For the poller: cycles whose activity listing failed.
    pub failed_cycles: Option<usize>,

    /// For the poller: per-record transaction fetches that failed.
    pub fetch_errors: Option<usize>,
}
