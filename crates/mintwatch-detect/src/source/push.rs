//! Push path: notifications delivered by an external indexer.
//!
//! The transport (see [`crate::webhook`]) owns the listener and calls
//! [`PushIngestor::on_notification`] once per inbound payload. A payload is a
//! single notification or an array of them, each shaped like:
//!
//! ```json
//! { "type": "TOKEN_MINT", "signature": "5h6x...", "tokenMint": "9xQe..." }
//! ```
//!
//! Indexers that only report the mint inside `tokenTransfers` are accepted too.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use mintwatch_core::{DetectionEvent, Source, TOKEN_MINT_EVENT};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::IngestStats;
use crate::coordinator::Coordinator;
use crate::{Error, Result};

/// Inbound listener lifecycle, driven by the coordinator.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Begin delivering notifications to `ingestor`. Fails if the listener cannot be set up.
    async fn start(&self, ingestor: PushIngestor) -> Result<()>;

    /// Stop accepting notifications. Must return in bounded time.
    async fn stop(&self);
}

/// Normalizes push notifications and submits them.
#[derive(Clone)]
pub struct PushIngestor {
    coordinator: Arc<Coordinator>,
    stats: Arc<IngestStats>,
}

impl PushIngestor {
    pub(crate) fn new(coordinator: Arc<Coordinator>, stats: Arc<IngestStats>) -> Self {
        Self { coordinator, stats }
    }

    /// Handle one inbound payload. Returns the number of first sightings submitted.
    ///
    /// Never fails: malformed notifications are logged, counted and dropped,
    /// and payloads arriving while the pipeline is not running are ignored.
    pub fn on_notification(&self, payload: &Value) -> usize {
        let notifications: &[Value] = match payload {
            Value::Array(items) => items,
            single => std::slice::from_ref(single),
        };
        self.stats.record_received(notifications.len());

        if !self.coordinator.is_accepting() {
            debug!(
                "Pipeline is {}, dropping {} push notification(s)",
                self.coordinator.state(),
                notifications.len()
            );
            for _ in notifications {
                self.stats.record_ignored();
            }
            counter!("detector_push_ignored_total").increment(notifications.len() as u64);
            return 0;
        }

        let mut submitted = 0;
        for notification in notifications {
            match parse_notification(notification) {
                Ok(Some(event)) => {
                    let duplicate = self.coordinator.submit(event).is_duplicate();
                    self.stats.record_submission(duplicate);
                    if !duplicate {
                        submitted += 1;
                    }
                }
                Ok(None) => {
                    self.stats.record_ignored();
                    counter!("detector_push_ignored_total").increment(1);
                }
                Err(e) => {
                    self.stats.record_malformed();
                    counter!("detector_push_malformed_total").increment(1);
                    warn!("Dropping malformed push notification: {}", e);
                }
            }
        }
        submitted
    }
}

/// Turn one notification into an event. `Ok(None)` for irrelevant types.
fn parse_notification(notification: &Value) -> Result<Option<DetectionEvent>> {
    let object = notification
        .as_object()
        .ok_or_else(|| malformed("notification is not an object"))?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing type"))?;
    if kind != TOKEN_MINT_EVENT {
        trace!("Ignoring push notification of type {}", kind);
        return Ok(None);
    }

    let signature = non_empty(object.get("signature")).ok_or_else(|| malformed("missing signature"))?;
    let mint = non_empty(object.get("tokenMint"))
        .or_else(|| {
            object
                .get("tokenTransfers")
                .and_then(|transfers| transfers.get(0))
                .and_then(|transfer| non_empty(transfer.get("mint")))
        })
        .ok_or_else(|| malformed("missing tokenMint"))?;

    Ok(Some(DetectionEvent::new(signature, mint, Source::Push)))
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn malformed(reason: &str) -> Error {
    mintwatch_core::Error::MalformedEvent(reason.to_string()).into()
}
