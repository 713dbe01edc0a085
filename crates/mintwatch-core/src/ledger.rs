//! The ledger read capability and the shapes it returns.
//!
//! The pipeline never talks to a node directly; it goes through [`Ledger`],
//! so tests can substitute an in-memory fake. Every method is a single,
//! retry-free call. Retrying and backoff belong to the caller.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::ResourceInfo;

/// Instruction types that create a new mint.
const MINT_CREATION_TYPES: &[&str] = &["initializeMint", "initializeMint2"];

/// Read access to the ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Most recent transaction signatures that touched `authority`, newest first.
    async fn recent_activity(&self, authority: &str, limit: usize) -> Result<Vec<ActivityRecord>>;

    /// Fetch and parse a transaction. `Ok(None)` when the node does not have it (yet).
    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>>;

    /// Fetch the account behind a resource. `Ok(None)` when the account does not exist.
    async fn resource_info(&self, resource_id: &str) -> Result<Option<ResourceInfo>>;
}

/// One entry of an address's recent activity (`getSignaturesForAddress`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub signature: String,
    #[serde(default)]
    pub slot: u64,
    /// Set when the transaction failed on-chain.
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(default)]
    pub block_time: Option<i64>,
}

impl ActivityRecord {
    /// A record for a successful transaction.
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            slot: 0,
            err: None,
            block_time: None,
        }
    }

    /// Whether the transaction failed, in which case it created nothing.
    pub fn failed(&self) -> bool {
        self.err.is_some()
    }
}

/// A single instruction in `jsonParsed` form.
///
/// `parsed` is an object (`{"type": .., "info": ..}`) for programs the node
/// knows how to decode, a bare string for a few (e.g. memo), and absent otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstruction {
    pub program_id: String,
    #[serde(default)]
    pub parsed: Option<Value>,
}

impl ParsedInstruction {
    /// Build a parsed instruction of the given type.
    pub fn new(program_id: impl Into<String>, kind: &str, info: Value) -> Self {
        Self {
            program_id: program_id.into(),
            parsed: Some(serde_json::json!({ "type": kind, "info": info })),
        }
    }

    /// The decoded instruction type, if any.
    pub fn kind(&self) -> Option<&str> {
        self.parsed.as_ref()?.get("type")?.as_str()
    }

    /// The mint this instruction creates, if it is a mint initialization by `program_id`.
    pub fn created_mint(&self, program_id: &str) -> Option<&str> {
        if self.program_id != program_id {
            return None;
        }
        let kind = self.kind()?;
        if !MINT_CREATION_TYPES.contains(&kind) {
            return None;
        }
        self.parsed.as_ref()?.get("info")?.get("mint")?.as_str()
    }
}

/// A transaction reduced to what mint detection needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransaction {
    pub signature: String,
    /// Top-level instructions followed by inner (CPI) instructions, in order.
    pub instructions: Vec<ParsedInstruction>,
    /// Whether the transaction failed on-chain.
    pub failed: bool,
}

#[derive(Deserialize)]
struct RpcTransaction {
    transaction: RpcTransactionBody,
    #[serde(default)]
    meta: Option<RpcMeta>,
}

#[derive(Deserialize)]
struct RpcTransactionBody {
    message: RpcMessage,
}

#[derive(Deserialize)]
struct RpcMessage {
    #[serde(default)]
    instructions: Vec<ParsedInstruction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMeta {
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    inner_instructions: Option<Vec<RpcInnerInstructions>>,
}

#[derive(Deserialize)]
struct RpcInnerInstructions {
    #[serde(default)]
    instructions: Vec<ParsedInstruction>,
}

impl ParsedTransaction {
    /// Decode a `getTransaction` result requested with `jsonParsed` encoding.
    pub fn from_rpc(signature: &str, value: &Value) -> Result<Self> {
        let tx = RpcTransaction::deserialize(value).map_err(|e| {
            Error::MalformedEvent(format!("transaction {signature}: {e}"))
        })?;

        let mut instructions = tx.transaction.message.instructions;
        let mut failed = false;
        if let Some(meta) = tx.meta {
            failed = meta.err.is_some();
            for inner in meta.inner_instructions.unwrap_or_default() {
                instructions.extend(inner.instructions);
            }
        }

        Ok(Self {
            signature: signature.to_string(),
            instructions,
            failed,
        })
    }

    /// The first mint created by `program_id` in this transaction.
    ///
    /// One detection per transaction: the signature is the dedup key, so any
    /// further mints in the same transaction would be discarded downstream anyway.
    pub fn created_mint(&self, program_id: &str) -> Option<&str> {
        if self.failed {
            return None;
        }
        self.instructions
            .iter()
            .find_map(|ix| ix.created_mint(program_id))
    }
}
