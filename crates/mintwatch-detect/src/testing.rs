//! Fakes for the pipeline's collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mintwatch_core::{
    ActivityRecord, DetectionEvent, Error as CoreError, Ledger, ParsedInstruction,
    ParsedTransaction, ResourceInfo, Result as CoreResult, TOKEN_PROGRAM_ID,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::Result;
use crate::action::ActionSink;
use crate::gate::ValidationGate;
use crate::observer::Observer;
use crate::source::{PushIngestor, PushTransport};

/// A transaction whose only instruction initializes `mint`.
pub fn mint_tx(signature: &str, mint: &str) -> ParsedTransaction {
    ParsedTransaction {
        signature: signature.to_string(),
        instructions: vec![ParsedInstruction::new(
            TOKEN_PROGRAM_ID,
            "initializeMint2",
            json!({ "mint": mint, "decimals": 6, "mintAuthority": "auth" }),
        )],
        failed: false,
    }
}

/// An initialized 6-decimal mint account.
pub fn mint_info(freeze_authority: Option<&str>) -> ResourceInfo {
    ResourceInfo {
        owner: TOKEN_PROGRAM_ID.to_string(),
        lamports: 1_461_600,
        data: json!({
            "parsed": {
                "type": "mint",
                "info": {
                    "decimals": 6,
                    "freezeAuthority": freeze_authority,
                    "isInitialized": true,
                    "mintAuthority": "auth",
                    "supply": "1000000000"
                }
            },
            "program": "spl-token"
        }),
    }
}

/// Scriptable in-memory ledger.
#[derive(Default)]
pub struct FakeLedger {
    activity: Mutex<Vec<ActivityRecord>>,
    scripted: Mutex<VecDeque<CoreResult<Vec<ActivityRecord>>>>,
    activity_times: Mutex<Vec<Instant>>,
    transactions: Mutex<HashMap<String, ParsedTransaction>>,
    transaction_calls: AtomicUsize,
    fail_transactions: AtomicBool,
    hold: Mutex<Option<Arc<Semaphore>>>,
    resources: Mutex<HashMap<String, ResourceInfo>>,
    resource_calls: AtomicUsize,
    fail_resources: AtomicBool,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listing returned whenever no scripted response is queued.
    pub fn set_activity(&self, records: Vec<ActivityRecord>) {
        *self.activity.lock() = records;
    }

    /// Queue the response for the next listing call.
    pub fn push_activity(&self, response: CoreResult<Vec<ActivityRecord>>) {
        self.scripted.lock().push_back(response);
    }

    /// When each listing call happened.
    pub fn activity_times(&self) -> Vec<Instant> {
        self.activity_times.lock().clone()
    }

    pub fn add_transaction(&self, tx: ParsedTransaction) {
        self.transactions.lock().insert(tx.signature.clone(), tx);
    }

    pub fn transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }

    /// Block transaction fetches until permits are added to the returned semaphore.
    pub fn hold_transactions(&self) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.hold.lock() = Some(Arc::clone(&semaphore));
        semaphore
    }

    pub fn set_resource(&self, id: &str, info: ResourceInfo) {
        self.resources.lock().insert(id.to_string(), info);
    }

    pub fn resource_calls(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn fail_resources(&self, fail: bool) {
        self.fail_resources.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn recent_activity(&self, _authority: &str, limit: usize) -> CoreResult<Vec<ActivityRecord>> {
        self.activity_times.lock().push(Instant::now());
        if let Some(response) = self.scripted.lock().pop_front() {
            return response;
        }
        Ok(self.activity.lock().iter().take(limit).cloned().collect())
    }

    async fn parsed_transaction(&self, signature: &str) -> CoreResult<Option<ParsedTransaction>> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);

        let hold = self.hold.lock().clone();
        if let Some(semaphore) = hold {
            semaphore
                .acquire()
                .await
                .map_err(|e| CoreError::Transport(e.to_string()))?
                .forget();
        }

        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(CoreError::Rpc {
                code: -32005,
                message: "node is behind".to_string(),
            });
        }
        Ok(self.transactions.lock().get(signature).cloned())
    }

    async fn resource_info(&self, resource_id: &str) -> CoreResult<Option<ResourceInfo>> {
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_resources.load(Ordering::SeqCst) {
            return Err(CoreError::Transport("connection refused".to_string()));
        }
        Ok(self.resources.lock().get(resource_id).cloned())
    }
}

enum GatePolicy {
    AllowAll,
    Deny(HashSet<String>),
    RequireMetadata,
}

/// Gate with a fixed policy that counts its calls.
pub struct FakeGate {
    policy: GatePolicy,
    calls: AtomicUsize,
}

impl FakeGate {
    pub fn allow_all() -> Self {
        Self::with_policy(GatePolicy::AllowAll)
    }

    pub fn deny<const N: usize>(ids: [&str; N]) -> Self {
        Self::with_policy(GatePolicy::Deny(ids.iter().map(|s| s.to_string()).collect()))
    }

    /// Admit only when metadata is present.
    pub fn require_metadata() -> Self {
        Self::with_policy(GatePolicy::RequireMetadata)
    }

    fn with_policy(policy: GatePolicy) -> Self {
        Self {
            policy,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationGate for FakeGate {
    async fn validate(&self, resource_id: &str, info: Option<&ResourceInfo>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.policy {
            GatePolicy::AllowAll => true,
            GatePolicy::Deny(ids) => !ids.contains(resource_id),
            GatePolicy::RequireMetadata => info.is_some(),
        }
    }
}

/// Sink that records every call.
pub struct RecordingSink {
    result: bool,
    hold: Option<Semaphore>,
    executions: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn succeeding() -> Self {
        Self {
            result: true,
            hold: None,
            executions: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: false,
            ..Self::succeeding()
        }
    }

    /// Succeeds, but each call waits for a [`release`](Self::release) permit first.
    pub fn held() -> Self {
        Self {
            hold: Some(Semaphore::new(0)),
            ..Self::succeeding()
        }
    }

    pub fn release(&self, n: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(n);
        }
    }

    /// Resource ids the sink was called with, in call order.
    pub fn executions(&self) -> Vec<String> {
        self.executions.lock().clone()
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn execute(&self, resource_id: &str, _info: Option<&ResourceInfo>) -> bool {
        if let Some(hold) = &self.hold {
            match hold.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return false,
            }
        }
        self.executions.lock().push(resource_id.to_string());
        self.result
    }
}

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DetectionEvent>>,
    logs: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<DetectionEvent> {
        self.events.lock().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_event(&self, event: &DetectionEvent) {
        self.events.lock().push(event.clone());
    }

    fn on_log(&self, message: &str) {
        self.logs.lock().push(message.to_string());
    }
}

/// Transport that counts lifecycle calls and can be told to fail or stall.
#[derive(Default)]
pub struct FakeTransport {
    fail_start: bool,
    hold: Option<Semaphore>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    ingestor: Mutex<Option<PushIngestor>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// `start` waits for a [`release`](Self::release) before completing.
    pub fn held() -> Self {
        Self {
            hold: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Ingestor handed over by the most recent `start`.
    pub fn ingestor(&self) -> Option<PushIngestor> {
        self.ingestor.lock().clone()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn start(&self, ingestor: PushIngestor) -> Result<()> {
        if let Some(hold) = &self.hold
            && let Ok(permit) = hold.acquire().await
        {
            permit.forget();
        }
        if self.fail_start {
            return Err(std::io::Error::from(std::io::ErrorKind::AddrInUse).into());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.ingestor.lock() = Some(ingestor);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.ingestor.lock().take();
    }
}
