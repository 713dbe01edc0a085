//! Error types shared by the mintwatch crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading from the ledger or decoding its data.
#[derive(Error, Debug)]
pub enum Error {
    /// The ledger node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the node.
        message: String,
    },

    /// Transport-level failure talking to the ledger (connect, timeout, HTTP status).
    #[error("transport error: {0}")]
    Transport(String),

    /// A notification or ledger record could not be interpreted.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A field had an unexpected format.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error comes from the ledger being unavailable, as opposed
    /// to data it returned that could not be read. The poll loop logs the two
    /// differently; both end the cycle with the error backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc { .. } | Self::Transport(_))
    }
}
