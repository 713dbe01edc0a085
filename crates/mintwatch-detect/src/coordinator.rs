//! The coordinator: single admission authority for both ingestion paths.
//!
//! ```text
//!  PushIngestor ──┐
//!                 ├──► submit ──► SignatureCache ──► metadata ──► ValidationGate ──► observers
//!  PollIngestor ──┘    (inline)   (atomic check)     (spawned task)                  └─► ActionSink
//! ```
//!
//! `submit` does only the dedup check on the caller's task; everything after
//! that runs on its own spawned task so neither ingestor is ever blocked by a
//! slow validation or action. The cache lock is held only across the
//! check-and-insert.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use metrics::{counter, gauge};
use mintwatch_core::{DetectionEvent, Ledger};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::ActionSink;
use crate::cache::{CacheStats, SignatureCache};
use crate::config::PipelineConfig;
use crate::gate::{MintPolicyGate, ValidationGate};
use crate::observer::{Observer, ObserverSet};
use crate::source::{IngestStats, PollIngestor, PushIngestor, PushTransport, SourceStats};
use crate::{Error, Result};

/// Lifecycle of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the action for an admitted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// Auto-action is off, or no sink is attached.
    Skipped,
}

/// Result of processing a first sighting.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The gate turned the resource down. Not an error.
    Rejected { resource_id: String },
    /// The resource was admitted and observers notified.
    Admitted {
        event: DetectionEvent,
        action: ActionOutcome,
    },
}

/// Immediate answer from [`Coordinator::submit`].
#[derive(Debug)]
pub enum Submission {
    /// Already seen; discarded.
    Duplicate,
    /// First sighting; admission continues on the returned task.
    Accepted(JoinHandle<Admission>),
}

impl Submission {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }

    /// Wait for the admission decision. `None` for duplicates or if the task panicked.
    pub async fn admission(self) -> Option<Admission> {
        match self {
            Self::Duplicate => None,
            Self::Accepted(handle) => handle.await.ok(),
        }
    }
}

/// Counters over the coordinator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub submitted: u64,
    pub duplicates: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    duplicates: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    actions_succeeded: AtomicU64,
    actions_failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AdmissionStats {
        AdmissionStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            actions_succeeded: self.actions_succeeded.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Admissions currently past the dedup check.
#[derive(Debug, Default)]
struct Inflight {
    count: AtomicUsize,
    idle: Notify,
}

struct InflightGuard(Arc<Inflight>);

impl InflightGuard {
    fn enter(inflight: &Arc<Inflight>) -> Self {
        let now = inflight.count.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("detector_inflight_admissions").set(now as f64);
        Self(Arc::clone(inflight))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let before = self.0.count.fetch_sub(1, Ordering::SeqCst);
        gauge!("detector_inflight_admissions").set((before - 1) as f64);
        if before == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Resources owned by one `start`..`stop` run.
struct ActiveRun {
    halt: watch::Sender<bool>,
    /// Detached on stop: the poller finishes its current cycle and exits.
    poller: JoinHandle<()>,
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    config: PipelineConfig,
    ledger: Arc<dyn Ledger>,
    gate: Option<Arc<dyn ValidationGate>>,
    sink: Option<Arc<dyn ActionSink>>,
    observers: ObserverSet,
    transport: Option<Arc<dyn PushTransport>>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Admission gate. Defaults to a [`MintPolicyGate`] with default policy.
    pub fn gate(mut self, gate: Arc<dyn ValidationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Action sink. Required for `start`.
    pub fn action_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Push transport started and stopped with the pipeline. Optional.
    pub fn transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Arc<Coordinator> {
        let gate = self
            .gate
            .unwrap_or_else(|| Arc::new(MintPolicyGate::default()));
        let (state, _) = watch::channel(RunState::Stopped);

        Arc::new(Coordinator {
            cache: SignatureCache::with_bounds(self.config.cache_capacity, self.config.cache_retain),
            auto_action: AtomicBool::new(self.config.auto_action),
            config: self.config,
            ledger: self.ledger,
            gate,
            sink: self.sink,
            observers: self.observers,
            transport: self.transport,
            state,
            run: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            counters: Counters::default(),
            inflight: Arc::new(Inflight::default()),
            push_stats: Arc::new(IngestStats::default()),
            poll_stats: Arc::new(IngestStats::default()),
        })
    }
}

/// Owns the signature cache and the gate, and runs the pipeline lifecycle.
pub struct Coordinator {
    config: PipelineConfig,
    cache: SignatureCache,
    ledger: Arc<dyn Ledger>,
    gate: Arc<dyn ValidationGate>,
    sink: Option<Arc<dyn ActionSink>>,
    observers: ObserverSet,
    transport: Option<Arc<dyn PushTransport>>,
    auto_action: AtomicBool,
    /// Written only by `start` and `stop`.
    state: watch::Sender<RunState>,
    run: Mutex<Option<ActiveRun>>,
    /// Set by a `stop` that arrived while Starting; honored once launch completes.
    stop_requested: AtomicBool,
    counters: Counters,
    inflight: Arc<Inflight>,
    push_stats: Arc<IngestStats>,
    poll_stats: Arc<IngestStats>,
}

impl Coordinator {
    /// Start building a coordinator reading from `ledger`.
    pub fn builder(ledger: Arc<dyn Ledger>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config: PipelineConfig::default(),
            ledger,
            gate: None,
            sink: None,
            observers: ObserverSet::new(),
            transport: None,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the push transport and the poll loop.
    ///
    /// Stopped → Starting → Running. On any setup failure (invalid config, no
    /// action sink, transport failed to start) the state returns to Stopped
    /// and the error is returned. Calling `start` while running is a no-op.
    /// A `stop` received while starting takes effect as soon as the pipeline
    /// is up.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut previous = RunState::Stopped;
        let claimed = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == RunState::Stopped {
                self.stop_requested.store(false, Ordering::SeqCst);
                *state = RunState::Starting;
                true
            } else {
                false
            }
        });

        if !claimed {
            return match previous {
                RunState::Running => {
                    debug!("Start requested while already running");
                    Ok(())
                }
                other => Err(Error::Busy(other)),
            };
        }

        info!("Starting detection pipeline...");

        match self.launch().await {
            Ok(run) => {
                *self.run.lock() = Some(run);
                self.state.send_replace(RunState::Running);
                gauge!("detector_running").set(1.0);
                info!(
                    "Detection pipeline running: authority={}, interval={:?}, window={}",
                    self.config.authority, self.config.poll_interval, self.config.activity_window
                );
                self.observers.log("Detection pipeline started");

                if self.stop_requested.swap(false, Ordering::SeqCst) {
                    info!("Applying stop requested during startup");
                    self.stop().await;
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to start detection pipeline: {}", e);
                self.stop_requested.store(false, Ordering::SeqCst);
                self.state.send_replace(RunState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch(self: &Arc<Self>) -> Result<ActiveRun> {
        self.config.validate()?;
        if self.sink.is_none() {
            return Err(Error::Config("no action sink configured".to_string()));
        }

        match &self.transport {
            Some(transport) => {
                transport.start(self.push_ingestor()).await?;
            }
            None => warn!("No push transport configured, relying on polling only"),
        }

        let (halt, halt_rx) = watch::channel(false);
        let poller = PollIngestor::new(
            Arc::clone(&self.ledger),
            &self.config,
            Arc::clone(&self.poll_stats),
        );
        let poller = tokio::spawn(poller.run(Arc::clone(self), halt_rx));

        Ok(ActiveRun { halt, poller })
    }

    /// Stop taking new work. Idempotent and never waits on pending admissions.
    ///
    /// Running → Stopping → Stopped. The transport stops acting on new
    /// notifications; an in-flight poll cycle finishes its submissions but no
    /// further cycle is scheduled. Admissions already past the dedup check
    /// run to completion in the background (see [`wait_idle`](Self::wait_idle)).
    ///
    /// While Starting the request is recorded and `start` stops the pipeline
    /// right after it comes up.
    pub async fn stop(&self) {
        let mut previous = RunState::Running;
        let claimed = self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                RunState::Running => {
                    *state = RunState::Stopping;
                    true
                }
                // Under the channel lock so `start` cannot miss it
                RunState::Starting => {
                    self.stop_requested.store(true, Ordering::SeqCst);
                    false
                }
                _ => false,
            }
        });

        if !claimed {
            match previous {
                RunState::Starting => info!("Stop requested while starting, deferring"),
                other => debug!("Stop requested while {}", other),
            }
            return;
        }

        info!("Stopping detection pipeline...");

        if let Some(run) = self.run.lock().take() {
            run.halt.send_replace(true);
            drop(run.poller);
        }

        if let Some(transport) = &self.transport {
            transport.stop().await;
        }

        self.state.send_replace(RunState::Stopped);
        gauge!("detector_running").set(0.0);
        self.observers.log("Detection pipeline stopped");
        info!("Detection pipeline stopped");
    }

    /// A push ingestor submitting into this coordinator.
    pub fn push_ingestor(self: &Arc<Self>) -> PushIngestor {
        PushIngestor::new(Arc::clone(self), Arc::clone(&self.push_stats))
    }

    /// Wait until no admission is being validated or dispatched.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inflight.idle.notified();
            if self.inflight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Single entry point for both ingestors.
    ///
    /// The dedup check happens before this returns; a first sighting then
    /// continues on a spawned task. Must be called from within a tokio runtime.
    pub fn submit(self: &Arc<Self>, event: DetectionEvent) -> Submission {
        let source = event.source.as_str();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        counter!("detector_events_total", "source" => source).increment(1);

        if self.cache.contains_or_insert(&event.unique_id) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            counter!("detector_duplicates_total", "source" => source).increment(1);
            debug!("Duplicate {} from {}, discarding", event.unique_id, source);
            return Submission::Duplicate;
        }
        gauge!("detector_cache_entries").set(self.cache.len() as f64);

        debug!(
            "First sighting of {} (mint {}) via {}",
            event.unique_id, event.resource_id, source
        );

        let guard = InflightGuard::enter(&self.inflight);
        let this = Arc::clone(self);
        Submission::Accepted(tokio::spawn(async move {
            let _guard = guard;
            this.admit(event).await
        }))
    }

    /// Metadata, validation and dispatch for a first sighting.
    async fn admit(&self, mut event: DetectionEvent) -> Admission {
        if event.raw_info.is_none() {
            match self.ledger.resource_info(&event.resource_id).await {
                Ok(Some(info)) => event.raw_info = Some(info),
                Ok(None) => debug!("No account found yet for {}", event.resource_id),
                Err(e) => {
                    counter!("detector_metadata_errors_total").increment(1);
                    warn!("Error getting token info for {}: {}", event.resource_id, e);
                }
            }
        }

        if !self
            .gate
            .validate(&event.resource_id, event.raw_info.as_ref())
            .await
        {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            counter!("detector_rejected_total").increment(1);
            self.observers
                .log(&format!("Token {} rejected by validation", event.resource_id));
            return Admission::Rejected {
                resource_id: event.resource_id,
            };
        }

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        counter!("detector_admitted_total").increment(1);
        info!(
            "Admitted token {} (signature {}, via {})",
            event.resource_id, event.unique_id, event.source
        );
        self.observers.event(&event);
        self.observers
            .log(&format!("Detected new token: {}", event.resource_id));

        let action = self.dispatch(&event).await;
        Admission::Admitted { event, action }
    }

    async fn dispatch(&self, event: &DetectionEvent) -> ActionOutcome {
        let sink = match &self.sink {
            Some(sink) if self.auto_action() => sink,
            _ => return ActionOutcome::Skipped,
        };

        if sink
            .execute(&event.resource_id, event.raw_info.as_ref())
            .await
        {
            self.counters
                .actions_succeeded
                .fetch_add(1, Ordering::Relaxed);
            counter!("detector_actions_total", "outcome" => "ok").increment(1);
            self.observers
                .log(&format!("Action executed for {}", event.resource_id));
            ActionOutcome::Succeeded
        } else {
            self.counters.actions_failed.fetch_add(1, Ordering::Relaxed);
            counter!("detector_actions_total", "outcome" => "failed").increment(1);
            warn!("Action failed for {}", event.resource_id);
            self.observers
                .log(&format!("Action failed for {}", event.resource_id));
            ActionOutcome::Failed
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Whether push notifications should be acted on.
    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), RunState::Starting | RunState::Running)
    }

    pub fn auto_action(&self) -> bool {
        self.auto_action.load(Ordering::Relaxed)
    }

    /// Turn auto-action on or off without restarting.
    pub fn set_auto_action(&self, enabled: bool) {
        let was = self.auto_action.swap(enabled, Ordering::Relaxed);
        if was != enabled {
            info!("Auto-action {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &SignatureCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> AdmissionStats {
        self.counters.snapshot()
    }

    pub fn push_stats(&self) -> SourceStats {
        self.push_stats.snapshot()
    }

    pub fn poll_stats(&self) -> SourceStats {
        self.poll_stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGate, FakeLedger, FakeTransport, RecordingObserver, RecordingSink};
    use mintwatch_core::Source;
    use std::time::Duration;

    struct Harness {
        ledger: Arc<FakeLedger>,
        gate: Arc<FakeGate>,
        sink: Arc<RecordingSink>,
        observer: Arc<RecordingObserver>,
        coordinator: Arc<Coordinator>,
    }

    fn harness(gate: FakeGate) -> Harness {
        let ledger = Arc::new(FakeLedger::new());
        let gate = Arc::new(gate);
        let sink = Arc::new(RecordingSink::succeeding());
        let observer = Arc::new(RecordingObserver::default());
        let coordinator = Coordinator::builder(ledger.clone())
            .config(PipelineConfig {
                auto_action: true,
                ..Default::default()
            })
            .gate(gate.clone())
            .action_sink(sink.clone())
            .observer(observer.clone())
            .build();
        Harness {
            ledger,
            gate,
            sink,
            observer,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_admits_and_dispatches_once() {
        let h = harness(FakeGate::allow_all());
        let event = DetectionEvent::new("sig1", "tokenA", Source::Push);

        let admission = h.coordinator.submit(event).admission().await.unwrap();
        assert!(matches!(
            admission,
            Admission::Admitted {
                action: ActionOutcome::Succeeded,
                ..
            }
        ));

        assert_eq!(h.sink.executions(), vec!["tokenA".to_string()]);
        assert_eq!(h.observer.events().len(), 1);
        assert!(
            h.observer
                .logs()
                .contains(&"Detected new token: tokenA".to_string())
        );
    }

    #[tokio::test]
    async fn test_sequential_duplicates_discarded() {
        let h = harness(FakeGate::allow_all());

        let first = h
            .coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push));
        let second = h
            .coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Poll));
        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());

        first.admission().await.unwrap();
        assert_eq!(h.sink.executions().len(), 1);
        assert_eq!(h.coordinator.stats().duplicates, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicates_single_admission() {
        let h = harness(FakeGate::allow_all());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let coordinator = Arc::clone(&h.coordinator);
                let source = if i % 2 == 0 { Source::Push } else { Source::Poll };
                tokio::spawn(async move {
                    coordinator
                        .submit(DetectionEvent::new("sig-race", "tokenR", source))
                        .admission()
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(h.sink.executions(), vec!["tokenR".to_string()]);
        assert_eq!(h.observer.events().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_is_cached_and_never_dispatched() {
        let h = harness(FakeGate::deny(["tokenB"]));

        let admission = h
            .coordinator
            .submit(DetectionEvent::new("sig2", "tokenB", Source::Poll))
            .admission()
            .await
            .unwrap();
        assert_eq!(
            admission,
            Admission::Rejected {
                resource_id: "tokenB".to_string()
            }
        );

        // Resubmission is a duplicate: no second validation, no notification
        assert!(
            h.coordinator
                .submit(DetectionEvent::new("sig2", "tokenB", Source::Push))
                .is_duplicate()
        );
        h.coordinator.wait_idle().await;

        assert!(h.sink.executions().is_empty());
        assert!(h.observer.events().is_empty());
        assert_eq!(h.gate.calls(), 1);
        assert_eq!(h.coordinator.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_fetches_metadata_when_absent() {
        let h = harness(FakeGate::require_metadata());
        h.ledger
            .set_resource("tokenA", crate::testing::mint_info(None));

        let admission = h
            .coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();

        match admission {
            Admission::Admitted { event, .. } => assert!(event.raw_info.is_some()),
            other => panic!("expected admission, got {other:?}"),
        }
        assert_eq!(h.ledger.resource_calls(), 1);
    }

    #[tokio::test]
    async fn test_metadata_present_skips_lookup() {
        let h = harness(FakeGate::allow_all());
        let event = DetectionEvent::new("sig1", "tokenA", Source::Push)
            .with_info(crate::testing::mint_info(None));

        h.coordinator.submit(event).admission().await.unwrap();
        assert_eq!(h.ledger.resource_calls(), 0);
    }

    #[tokio::test]
    async fn test_metadata_error_goes_to_gate_without_info() {
        let h = harness(FakeGate::require_metadata());
        h.ledger.fail_resources(true);

        let admission = h
            .coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Rejected { .. }));
    }

    fn default_gate_coordinator(ledger: Arc<FakeLedger>) -> Arc<Coordinator> {
        Coordinator::builder(ledger)
            .action_sink(Arc::new(RecordingSink::succeeding()))
            .build()
    }

    #[tokio::test]
    async fn test_default_gate_missing_account_single_lookup() {
        let ledger = Arc::new(FakeLedger::new());
        let coordinator = default_gate_coordinator(ledger.clone());

        let admission = coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Rejected { .. }));
        assert_eq!(ledger.resource_calls(), 1);
    }

    #[tokio::test]
    async fn test_default_gate_lookup_error_not_retried() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.fail_resources(true);
        let coordinator = default_gate_coordinator(ledger.clone());

        for (sig, mint) in [("sig1", "tokenA"), ("sig2", "tokenB")] {
            let admission = coordinator
                .submit(DetectionEvent::new(sig, mint, Source::Poll))
                .admission()
                .await
                .unwrap();
            assert!(matches!(admission, Admission::Rejected { .. }));
        }
        assert_eq!(ledger.resource_calls(), 2);
    }

    #[tokio::test]
    async fn test_default_gate_admits_fetched_mint() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_resource("tokenA", crate::testing::mint_info(None));
        let coordinator = default_gate_coordinator(ledger.clone());

        let admission = coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Admitted { .. }));
        assert_eq!(ledger.resource_calls(), 1);
    }

    #[tokio::test]
    async fn test_action_failure_is_recorded() {
        let ledger = Arc::new(FakeLedger::new());
        let sink = Arc::new(RecordingSink::failing());
        let coordinator = Coordinator::builder(ledger)
            .config(PipelineConfig {
                auto_action: true,
                ..Default::default()
            })
            .gate(Arc::new(FakeGate::allow_all()))
            .action_sink(sink.clone())
            .build();

        let admission = coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();
        assert!(matches!(
            admission,
            Admission::Admitted {
                action: ActionOutcome::Failed,
                ..
            }
        ));

        // A failed action does not stop later admissions
        coordinator
            .submit(DetectionEvent::new("sig2", "tokenB", Source::Push))
            .admission()
            .await
            .unwrap();
        assert_eq!(sink.executions().len(), 2);
        assert_eq!(coordinator.stats().actions_failed, 2);
    }

    #[tokio::test]
    async fn test_auto_action_toggle() {
        let h = harness(FakeGate::allow_all());
        h.coordinator.set_auto_action(false);

        let admission = h
            .coordinator
            .submit(DetectionEvent::new("sig1", "tokenA", Source::Push))
            .admission()
            .await
            .unwrap();
        assert!(matches!(
            admission,
            Admission::Admitted {
                action: ActionOutcome::Skipped,
                ..
            }
        ));
        assert!(h.sink.executions().is_empty());
        assert_eq!(h.observer.events().len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_ids_not_blocked_by_slow_sink() {
        let ledger = Arc::new(FakeLedger::new());
        let sink = Arc::new(RecordingSink::held());
        let observer = Arc::new(RecordingObserver::default());
        let coordinator = Coordinator::builder(ledger)
            .config(PipelineConfig {
                auto_action: true,
                ..Default::default()
            })
            .gate(Arc::new(FakeGate::allow_all()))
            .action_sink(sink.clone())
            .observer(observer.clone())
            .build();

        // First admission hangs inside the sink
        let stuck = coordinator.submit(DetectionEvent::new("sig1", "tokenA", Source::Push));
        // A second id still gets through the cache and reaches observers
        let other = coordinator.submit(DetectionEvent::new("sig2", "tokenB", Source::Poll));
        assert!(!stuck.is_duplicate());
        assert!(!other.is_duplicate());

        tokio::time::timeout(Duration::from_secs(5), async {
            while observer.events().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        sink.release(2);
        coordinator.wait_idle().await;
        assert_eq!(sink.executions().len(), 2);
    }

    #[tokio::test]
    async fn test_start_requires_action_sink() {
        let coordinator = Coordinator::builder(Arc::new(FakeLedger::new()))
            .gate(Arc::new(FakeGate::allow_all()))
            .build();

        let err = coordinator.start().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(coordinator.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let coordinator = Coordinator::builder(Arc::new(FakeLedger::new()))
            .config(PipelineConfig {
                activity_window: 0,
                ..Default::default()
            })
            .action_sink(Arc::new(RecordingSink::succeeding()))
            .build();

        assert!(coordinator.start().await.is_err());
        assert_eq!(coordinator.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_stopped() {
        let transport = Arc::new(FakeTransport::failing());
        let coordinator = Coordinator::builder(Arc::new(FakeLedger::new()))
            .action_sink(Arc::new(RecordingSink::succeeding()))
            .transport(transport.clone())
            .build();

        assert!(coordinator.start().await.is_err());
        assert_eq!(coordinator.state(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_start_is_deferred() {
        let transport = Arc::new(FakeTransport::held());
        let coordinator = Coordinator::builder(Arc::new(FakeLedger::new()))
            .action_sink(Arc::new(RecordingSink::succeeding()))
            .transport(transport.clone())
            .build();

        let starting = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.start().await })
        };
        while coordinator.state() != RunState::Starting {
            tokio::task::yield_now().await;
        }

        // Returns at once; the pipeline is still coming up
        coordinator.stop().await;
        assert_eq!(coordinator.state(), RunState::Starting);
        assert_eq!(transport.stops(), 0);

        transport.release();
        starting.await.unwrap().unwrap();

        assert_eq!(coordinator.state(), RunState::Stopped);
        assert_eq!(transport.starts(), 1);
        assert_eq!(transport.stops(), 1);

        // The request does not leak into the next run
        transport.release();
        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), RunState::Running);
        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let transport = Arc::new(FakeTransport::new());
        let coordinator = Coordinator::builder(Arc::new(FakeLedger::new()))
            .action_sink(Arc::new(RecordingSink::succeeding()))
            .transport(transport.clone())
            .build();
        let mut states = coordinator.subscribe_state();

        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), RunState::Running);
        assert!(coordinator.is_accepting());
        assert_eq!(transport.starts(), 1);

        let ingestor = transport.ingestor().unwrap();
        let mint = serde_json::json!({ "type": "TOKEN_MINT", "signature": "sig1", "tokenMint": "tokenA" });
        assert_eq!(ingestor.on_notification(&mint), 1);

        // Starting again while running is a no-op
        coordinator.start().await.unwrap();
        assert_eq!(transport.starts(), 1);

        coordinator.stop().await;
        assert_eq!(coordinator.state(), RunState::Stopped);
        assert!(!coordinator.is_accepting());
        assert_eq!(transport.stops(), 1);

        // A late delivery on a stopped pipeline is dropped
        let late = serde_json::json!({ "type": "TOKEN_MINT", "signature": "sig2", "tokenMint": "tokenB" });
        assert_eq!(ingestor.on_notification(&late), 0);
        assert!(!coordinator.cache().contains("sig2"));

        // Stop is idempotent
        coordinator.stop().await;
        assert_eq!(transport.stops(), 1);

        // The watch channel saw the final state
        assert_eq!(*states.borrow_and_update(), RunState::Stopped);

        // And the pipeline can be started again
        coordinator.start().await.unwrap();
        assert_eq!(transport.starts(), 2);
        coordinator.stop().await;
    }
}
