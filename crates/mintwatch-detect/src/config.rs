//! Pipeline configuration.

use std::time::Duration;

use mintwatch_core::TOKEN_PROGRAM_ID;

use crate::cache::{DEFAULT_CAPACITY, DEFAULT_RETAIN};
use crate::{Error, Result};

/// Configuration accepted by the [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Address whose recent activity the poller scans (the SPL Token program).
    pub authority: String,

    /// Delay between successful poll cycles.
    pub poll_interval: Duration,

    /// Delay after a poll cycle that failed to reach the ledger.
    pub error_backoff: Duration,

    /// Number of most recent activity records fetched per cycle.
    ///
    /// Bursts of more than this many transactions between two cycles are not
    /// all seen by the poller; the push path is expected to cover them.
    pub activity_window: usize,

    /// Signature cache population that triggers compaction.
    pub cache_capacity: usize,

    /// Signature cache population kept after compaction.
    pub cache_retain: usize,

    /// Invoke the action sink for admitted resources.
    pub auto_action: bool,

    /// How long `stop` waits for the push transport to drain.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            authority: TOKEN_PROGRAM_ID.to_string(),
            poll_interval: Duration::from_millis(1000),
            error_backoff: Duration::from_millis(5000),
            activity_window: 10,
            cache_capacity: DEFAULT_CAPACITY,
            cache_retain: DEFAULT_RETAIN,
            auto_action: false,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Check the configuration is usable. Called by `start`.
    pub fn validate(&self) -> Result<()> {
        if self.authority.trim().is_empty() {
            return Err(Error::Config("authority address is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".to_string()));
        }
        if self.error_backoff.is_zero() {
            return Err(Error::Config("error backoff must be non-zero".to_string()));
        }
        if self.activity_window == 0 {
            return Err(Error::Config("activity window must be at least 1".to_string()));
        }
        if self.cache_retain == 0 || self.cache_retain >= self.cache_capacity {
            return Err(Error::Config(format!(
                "cache retain ({}) must be between 1 and capacity ({})",
                self.cache_retain, self.cache_capacity
            )));
        }
        Ok(())
    }
}
