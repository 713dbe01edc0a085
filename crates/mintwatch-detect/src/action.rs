//! Action sinks invoked for admitted mints.
//!
//! What an action actually does (placing a buy, notifying a trader, ...) is
//! outside this crate. A sink reports success or failure and never errors
//! into the coordinator.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mintwatch_core::ResourceInfo;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::Result;

/// Executes the downstream action for an admitted resource.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Act on `resource_id`. Returns `false` on failure; may take arbitrarily long.
    async fn execute(&self, resource_id: &str, info: Option<&ResourceInfo>) -> bool;
}

/// Trade parameters forwarded with every action.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Amount to spend per trade, in SOL.
    pub trade_amount: f64,
    /// Maximum slippage, in percent.
    pub max_slippage_pct: f64,
    /// Action attempts kept in memory; older ones are dropped.
    pub history_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            trade_amount: 0.1,
            max_slippage_pct: 5.0,
            history_size: 100,
        }
    }
}

/// One action attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub mint: String,
    pub amount: f64,
    pub max_slippage_pct: f64,
    pub succeeded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Most recent action attempts, capped at `capacity`.
#[derive(Debug)]
pub struct ActionHistory {
    capacity: usize,
    records: Mutex<VecDeque<ActionRecord>>,
}

impl ActionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn record(&self, config: &SinkConfig, mint: &str, succeeded: bool) {
        let mut records = self.records.lock();
        records.push_back(ActionRecord {
            mint: mint.to_string(),
            amount: config.trade_amount,
            max_slippage_pct: config.max_slippage_pct,
            succeeded,
            timestamp: Utc::now(),
        });
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

/// Sink that only records what it would have done. Always succeeds.
#[derive(Debug)]
pub struct DryRunSink {
    config: SinkConfig,
    history: ActionHistory,
}

impl DryRunSink {
    pub fn new(config: SinkConfig) -> Self {
        Self {
            history: ActionHistory::new(config.history_size),
            config,
        }
    }

    pub fn history(&self) -> Vec<ActionRecord> {
        self.history.snapshot()
    }
}

#[async_trait]
impl ActionSink for DryRunSink {
    async fn execute(&self, resource_id: &str, _info: Option<&ResourceInfo>) -> bool {
        info!(
            "Dry run: would buy {} SOL of {} (max slippage {}%)",
            self.config.trade_amount, resource_id, self.config.max_slippage_pct
        );
        self.history.record(&self.config, resource_id, true);
        true
    }
}

/// Body posted to an external executor by [`HttpActionSink`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest<'a> {
    pub mint: &'a str,
    pub amount: f64,
    pub max_slippage_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<&'a ResourceInfo>,
}

/// Sink that hands each action to an external executor over HTTP.
///
/// Any transport error or non-2xx response counts as a failed action.
pub struct HttpActionSink {
    client: reqwest::Client,
    endpoint: String,
    config: SinkConfig,
    history: ActionHistory,
}

impl HttpActionSink {
    /// Create a sink posting to `endpoint`, giving up on a request after `timeout`.
    pub fn new(endpoint: impl Into<String>, config: SinkConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            history: ActionHistory::new(config.history_size),
            config,
        })
    }

    pub fn history(&self) -> Vec<ActionRecord> {
        self.history.snapshot()
    }

    async fn post(&self, request: &ActionRequest<'_>) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ActionSink for HttpActionSink {
    async fn execute(&self, resource_id: &str, info: Option<&ResourceInfo>) -> bool {
        let request = ActionRequest {
            mint: resource_id,
            amount: self.config.trade_amount,
            max_slippage_pct: self.config.max_slippage_pct,
            metadata: info,
        };

        let succeeded = match self.post(&request).await {
            Ok(()) => {
                info!("Executor accepted action for {}", resource_id);
                true
            }
            Err(e) => {
                warn!("Executor rejected action for {}: {}", resource_id, e);
                false
            }
        };

        self.history.record(&self.config, resource_id, succeeded);
        succeeded
    }
}
