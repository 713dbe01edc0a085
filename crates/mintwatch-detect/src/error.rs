//! Error types for the detection pipeline.

use thiserror::Error;

use crate::coordinator::RunState;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the detection pipeline.
///
/// Only configuration and lifecycle errors ever reach a caller of
/// [`Coordinator::start`](crate::Coordinator::start); everything that happens
/// per event is recovered and logged.
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger or data error from the core crate.
    #[error(transparent)]
    Core(#[from] mintwatch_core::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error (binding the webhook listener, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error. Fatal at start.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Start requested while the pipeline is between states.
    #[error("pipeline is {0}, retry once the transition completes")]
    Busy(RunState),
}
