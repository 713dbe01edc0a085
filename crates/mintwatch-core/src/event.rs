//! Detection events and the resource metadata attached to them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Which ingestion path observed an event.
///
/// Provenance is kept for diagnostics only; it is never part of the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Pushed to us by an indexer webhook.
    Push,
    /// Found by scanning recent ledger activity.
    Poll,
}

impl Source {
    /// Stable label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation of a newly created token mint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    /// Dedup key: the signature of the transaction that created the mint.
    pub unique_id: String,
    /// Address of the new mint.
    pub resource_id: String,
    /// Ingestion path that produced this observation.
    pub source: Source,
    /// When this process observed the event.
    pub observed_at: DateTime<Utc>,
    /// Mint account metadata, absent until fetched or if retrieval failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_info: Option<ResourceInfo>,
}

impl DetectionEvent {
    /// Create an event observed now, without metadata.
    pub fn new(
        unique_id: impl Into<String>,
        resource_id: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            resource_id: resource_id.into(),
            source,
            observed_at: Utc::now(),
            raw_info: None,
        }
    }

    /// Attach already-known metadata.
    pub fn with_info(mut self, info: ResourceInfo) -> Self {
        self.raw_info = Some(info);
        self
    }
}

/// Account data for a resource as returned by the ledger (`jsonParsed` encoding).
///
/// The payload is kept opaque apart from the owner and balance; [`ResourceInfo::mint`]
/// interprets it as an SPL mint when the admission policy needs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    /// Program that owns the account.
    pub owner: String,
    /// Account balance in lamports.
    #[serde(default)]
    pub lamports: u64,
    /// Account data, parsed by the node where it knows the layout.
    #[serde(default)]
    pub data: Value,
}

impl ResourceInfo {
    /// Interpret the account data as an SPL token mint.
    pub fn mint(&self) -> Result<MintInfo> {
        let parsed = self
            .data
            .get("parsed")
            .ok_or_else(|| Error::MalformedEvent("account data is not parsed".to_string()))?;

        let kind = parsed.get("type").and_then(Value::as_str).unwrap_or_default();
        if kind != "mint" {
            return Err(Error::InvalidField {
                field: "type",
                reason: format!("expected mint account, got '{kind}'"),
            });
        }

        let info = parsed
            .get("info")
            .ok_or_else(|| Error::MalformedEvent("mint account has no info".to_string()))?;

        let decimals = info
            .get("decimals")
            .and_then(Value::as_u64)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| Error::InvalidField {
                field: "decimals",
                reason: "missing or out of range".to_string(),
            })?;

        // The node reports supply as a decimal string to avoid precision loss.
        let supply = match info.get("supply") {
            Some(Value::String(s)) => s.parse::<u64>().map_err(|e| Error::InvalidField {
                field: "supply",
                reason: e.to_string(),
            })?,
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| Error::InvalidField {
                field: "supply",
                reason: "not an unsigned integer".to_string(),
            })?,
            _ => {
                return Err(Error::InvalidField {
                    field: "supply",
                    reason: "missing".to_string(),
                });
            }
        };

        let authority = |key: &str| info.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(MintInfo {
            decimals,
            supply,
            mint_authority: authority("mintAuthority"),
            freeze_authority: authority("freezeAuthority"),
            is_initialized: info
                .get("isInitialized")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// The fields of an SPL mint account the admission policy looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintInfo {
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<String>,
    pub freeze_authority: Option<String>,
    pub is_initialized: bool,
}
