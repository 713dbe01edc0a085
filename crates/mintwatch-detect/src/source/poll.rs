//! Poll path: periodic scan of the authority's recent activity.
//!
//! Each cycle lists the most recent `activity_window` signatures for the
//! authority address, fetches the transactions it has not looked at yet and
//! submits one event per transaction that initialized a mint. Bursts larger
//! than the window between two cycles are not all seen; the push path is
//! expected to cover them.
//!
//! Cycles are strictly sequential. A failed listing reschedules after the
//! error backoff instead of the interval. The loop exits once the run's halt
//! signal fires, after the current cycle's submissions have been issued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use mintwatch_core::{DetectionEvent, Ledger, Source};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::IngestStats;
use crate::{Error, Result};
use crate::cache::SignatureCache;
use crate::config::PipelineConfig;
use crate::coordinator::Coordinator;

/// Outcome of one successful scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Activity records returned by the ledger.
    pub listed: usize,
    /// Records not previously seen by this ingestor.
    pub fresh: usize,
    /// Records skipped because the transaction failed on-chain.
    pub failed_transactions: usize,
    /// Transactions that initialized a mint.
    pub matched: usize,
    /// Matches the coordinator accepted as first sightings.
    pub submitted: usize,
    /// Matches the coordinator had already seen (usually via push).
    pub duplicates: usize,
    /// Transactions that could not be fetched or parsed; retried next cycle.
    pub fetch_errors: usize,
}

/// Scans recent activity and submits newly created mints.
pub struct PollIngestor {
    ledger: Arc<dyn Ledger>,
    authority: String,
    window: usize,
    interval: Duration,
    backoff: Duration,
    /// Local pre-filter; the coordinator's cache remains the authority.
    seen: SignatureCache,
    stats: Arc<IngestStats>,
}

impl PollIngestor {
    pub fn new(ledger: Arc<dyn Ledger>, config: &PipelineConfig, stats: Arc<IngestStats>) -> Self {
        Self {
            ledger,
            authority: config.authority.clone(),
            window: config.activity_window,
            interval: config.poll_interval,
            backoff: config.error_backoff,
            seen: SignatureCache::with_bounds(config.cache_capacity, config.cache_retain),
            stats,
        }
    }

    /// Run one scan cycle.
    ///
    /// Errors only when the activity listing itself fails; a transaction that
    /// cannot be fetched is counted and left unseen so the next cycle retries it.
    pub async fn run_once(&self, coordinator: &Arc<Coordinator>) -> Result<CycleReport> {
        let records = self
            .ledger
            .recent_activity(&self.authority, self.window)
            .await?;

        let mut report = CycleReport {
            listed: records.len(),
            ..Default::default()
        };
        self.stats.record_received(records.len());

        // Ledger returns newest first; submit in chain order.
        for record in records.iter().rev() {
            if self.seen.contains(&record.signature) {
                continue;
            }
            report.fresh += 1;

            if record.failed() {
                trace!("Skipping failed transaction {}", record.signature);
                self.seen.insert(&record.signature);
                self.stats.record_ignored();
                report.failed_transactions += 1;
                continue;
            }

            let tx = match self.ledger.parsed_transaction(&record.signature).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    debug!("Transaction {} not available yet", record.signature);
                    continue;
                }
                Err(e) => {
                    warn!("Error fetching transaction {}: {}", record.signature, e);
                    self.stats.record_fetch_error();
                    report.fetch_errors += 1;
                    continue;
                }
            };
            self.seen.insert(&record.signature);

            if tx.failed {
                self.stats.record_ignored();
                report.failed_transactions += 1;
                continue;
            }

            let Some(mint) = tx.created_mint(&self.authority) else {
                self.stats.record_ignored();
                continue;
            };
            report.matched += 1;

            debug!("Poll found mint {} in {}", mint, record.signature);
            let event = DetectionEvent::new(record.signature.as_str(), mint, Source::Poll);
            let duplicate = coordinator.submit(event).is_duplicate();
            self.stats.record_submission(duplicate);
            if duplicate {
                report.duplicates += 1;
            } else {
                report.submitted += 1;
            }
        }

        counter!("detector_poll_records_total").increment(report.fresh as u64);
        Ok(report)
    }

    /// Delay before the next cycle given how this one ended.
    pub fn next_delay(&self, outcome: &Result<CycleReport>) -> Duration {
        match outcome {
            Ok(_) => self.interval,
            Err(_) => self.backoff,
        }
    }

    /// Self-rescheduling cycle loop. Returns when `halt` becomes `true` or its sender is dropped.
    pub async fn run(self, coordinator: Arc<Coordinator>, mut halt: watch::Receiver<bool>) {
        info!(
            "Poll loop started (authority: {}, window: {}, interval: {:?})",
            self.authority, self.window, self.interval
        );
        let mut cycles = 0u64;

        loop {
            if *halt.borrow() {
                break;
            }

            let start = Instant::now();
            let outcome = self.run_once(&coordinator).await;
            cycles += 1;

            match &outcome {
                Ok(report) => {
                    self.stats.record_cycle(true);
                    counter!("detector_poll_cycles_total", "outcome" => "ok").increment(1);
                    if report.submitted > 0 || report.fetch_errors > 0 {
                        debug!(
                            "Poll cycle {}: {} listed, {} fresh, {} submitted, {} duplicates, {} fetch errors in {:?}",
                            cycles,
                            report.listed,
                            report.fresh,
                            report.submitted,
                            report.duplicates,
                            report.fetch_errors,
                            start.elapsed()
                        );
                    }
                }
                Err(e) => {
                    self.stats.record_cycle(false);
                    counter!("detector_poll_cycles_total", "outcome" => "error").increment(1);
                    if ledger_unavailable(e) {
                        warn!("Poll cycle {} failed, backing off {:?}: {}", cycles, self.backoff, e);
                    } else {
                        error!(
                            "Poll cycle {} got unreadable activity, backing off {:?}: {}",
                            cycles, self.backoff, e
                        );
                    }
                }
            }

            let delay = self.next_delay(&outcome);
            if *halt.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = halt.changed() => {
                    if changed.is_err() || *halt.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poll loop stopped after {} cycles", cycles);
    }
}

/// Whether a failed listing is the node being unreachable or overloaded rather than bad data.
fn ledger_unavailable(error: &Error) -> bool {
    matches!(error, Error::Core(core) if core.is_transient())
}
