//! mintwatch detection pipeline.
//!
//! Discovers newly created SPL token mints through two independent, racing
//! ingestion paths and hands each one to a downstream action exactly once.
//!
//! # Modules
//!
//! - [`coordinator`] - Lifecycle and the single admission entry point
//! - [`source`] - Push (webhook) and poll (RPC) ingestors
//! - [`cache`] - Bounded recency-window signature cache
//! - [`gate`] - Admission policy
//! - [`action`] - Action sinks (dry run, HTTP executor)
//! - [`observer`] - Detection and log notifications
//! - [`webhook`] - Axum listener implementing the push transport
//! - [`rpc`] - Solana JSON-RPC ledger
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   ┌─────────────────┐
//! │ WebhookServer   │   │  PollIngestor   │  (RpcLedger, every poll_interval)
//! │ → PushIngestor  │   │                 │
//! └────────┬────────┘   └────────┬────────┘
//!          └──────────┬──────────┘
//!                     ▼
//! ┌─────────────────────────────────────┐
//! │ Coordinator::submit                 │
//! │   SignatureCache (check-and-insert) │
//! └────────────────┬────────────────────┘
//!                  ▼  spawned per first sighting
//! ┌─────────────────────────────────────┐
//! │ metadata → ValidationGate           │
//! │   → observers → ActionSink          │
//! └─────────────────────────────────────┘
//! ```
//!
//! The signature cache is the only dedup authority: an id is admitted at most
//! once no matter which path reports it first, and rejected ids are cached too.

pub mod action;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod observer;
pub mod rpc;
pub mod source;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

pub use action::{
    ActionHistory, ActionRecord, ActionRequest, ActionSink, DryRunSink, HttpActionSink, SinkConfig,
};
pub use cache::{CacheStats, SignatureCache};
pub use config::PipelineConfig;
pub use coordinator::{
    ActionOutcome, Admission, AdmissionStats, Coordinator, CoordinatorBuilder, RunState,
    Submission,
};
pub use gate::{GateConfig, MintPolicyGate, Rejection, ValidationGate};
pub use observer::{
    BroadcastObserver, DetectionLog, Observer, ObserverSet, PipelineUpdate, TracingObserver,
};
pub use rpc::{RpcConfig, RpcLedger};
pub use source::{
    CycleReport, IngestStats, PollIngestor, PushIngestor, PushTransport, SourceMetadata,
    SourceStats,
};
pub use webhook::{WebhookConfig, WebhookServer, WebhookState};

pub use mintwatch_core::{DetectionEvent, Ledger, ResourceInfo, Source};
