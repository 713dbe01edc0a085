//! Observers notified of admitted detections and pipeline log lines.
//!
//! Notifications are fire-and-forget. Observers must return quickly, and a
//! panicking observer is contained so it cannot take the coordinator down.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use mintwatch_core::DetectionEvent;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Receives pipeline notifications (typically a UI).
pub trait Observer: Send + Sync {
    /// A resource was admitted.
    fn on_event(&self, event: &DetectionEvent);

    /// A human-readable activity line.
    fn on_log(&self, message: &str);
}

/// Fan-out over a set of observers.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer.
    pub fn push(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Notify every observer of an admitted event.
    pub fn event(&self, event: &DetectionEvent) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                warn!("Observer panicked handling event {}", event.unique_id);
            }
        }
    }

    /// Send an activity line to every observer.
    pub fn log(&self, message: &str) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_log(message))).is_err() {
                warn!("Observer panicked handling log line");
            }
        }
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &DetectionEvent) {
        info!(
            mint = %event.resource_id,
            signature = %event.unique_id,
            source = %event.source,
            "new token detected"
        );
    }

    fn on_log(&self, message: &str) {
        info!("{}", message);
    }
}

/// A notification as published on a [`BroadcastObserver`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum PipelineUpdate {
    Detected(DetectionEvent),
    Log(String),
}

/// Republishes notifications on a broadcast channel for any number of
/// subscribers (a dashboard, a websocket bridge, ...).
///
/// Slow subscribers lag and lose messages; the sender never waits.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<PipelineUpdate>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineUpdate> {
        self.sender.subscribe()
    }
}

impl Observer for BroadcastObserver {
    fn on_event(&self, event: &DetectionEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(PipelineUpdate::Detected(event.clone()));
    }

    fn on_log(&self, message: &str) {
        let _ = self.sender.send(PipelineUpdate::Log(message.to_string()));
    }
}

/// Bounded history of admitted detections and activity lines, newest first.
///
/// Each history keeps at most `capacity` entries.
#[derive(Debug)]
pub struct DetectionLog {
    capacity: usize,
    entries: Mutex<VecDeque<DetectionEvent>>,
    lines: Mutex<VecDeque<String>>,
}

impl DetectionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Snapshot of the history, newest first.
    pub fn recent(&self) -> Vec<DetectionEvent> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Snapshot of the activity lines, newest first.
    pub fn recent_logs(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Observer for DetectionLog {
    fn on_event(&self, event: &DetectionEvent) {
        let mut entries = self.entries.lock();
        entries.push_front(event.clone());
        entries.truncate(self.capacity);
    }

    fn on_log(&self, message: &str) {
        let mut lines = self.lines.lock();
        lines.push_front(message.to_string());
        lines.truncate(self.capacity);
    }
}
