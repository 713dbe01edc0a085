//! Core types, the ledger capability, and shared utilities for mintwatch.
//!
//! This crate provides:
//! - [`DetectionEvent`] and the resource metadata types carried through the pipeline
//! - The [`Ledger`](ledger::Ledger) capability and the parsed shapes it returns
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod ledger;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// SPL Token program address. New mints are initialized by this program, so
/// it is the authority whose recent activity the poller scans.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Event type an indexer webhook uses for newly minted tokens.
pub const TOKEN_MINT_EVENT: &str = "TOKEN_MINT";

pub use error::{Error, Result};
pub use event::{DetectionEvent, MintInfo, ResourceInfo, Source};
pub use ledger::{ActivityRecord, Ledger, ParsedInstruction, ParsedTransaction};
