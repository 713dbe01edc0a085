//! Admission policy for detected mints.
//!
//! The gate answers one question: should the pipeline act on this resource?
//! It never fails; anything that goes wrong while deciding is a rejection.
//! Metadata is fetched once by the coordinator before the gate runs, so a gate
//! only sees what that lookup produced.

use std::fmt;

use async_trait::async_trait;
use mintwatch_core::{MintInfo, ResourceInfo};
use tracing::debug;

/// Decides whether a detected resource is admissible.
#[async_trait]
pub trait ValidationGate: Send + Sync {
    /// `true` to admit. Must return `false` rather than fail on lookup or parse errors.
    async fn validate(&self, resource_id: &str, info: Option<&ResourceInfo>) -> bool;
}

/// Policy knobs for [`MintPolicyGate`].
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Reject when no mint account could be retrieved.
    pub require_metadata: bool,
    /// Reject mints that still have a freeze authority.
    pub reject_freeze_authority: bool,
    /// Highest decimals value accepted.
    pub max_decimals: u8,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            require_metadata: true,
            reject_freeze_authority: true,
            max_decimals: 9,
        }
    }
}

/// Why a mint was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingMetadata,
    NotAMint(String),
    Uninitialized,
    FreezeAuthority(String),
    TooManyDecimals(u8),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingMetadata => write!(f, "no mint account metadata"),
            Self::NotAMint(e) => write!(f, "not a mint account: {e}"),
            Self::Uninitialized => write!(f, "mint is not initialized"),
            Self::FreezeAuthority(a) => write!(f, "freeze authority {a} is set"),
            Self::TooManyDecimals(d) => write!(f, "{d} decimals exceeds limit"),
        }
    }
}

/// Gate that checks the mint account against a [`GateConfig`].
#[derive(Debug, Clone, Default)]
pub struct MintPolicyGate {
    config: GateConfig,
}

impl MintPolicyGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Apply the policy to a mint account.
    pub fn evaluate(&self, info: &ResourceInfo) -> Result<MintInfo, Rejection> {
        let mint = info.mint().map_err(|e| Rejection::NotAMint(e.to_string()))?;

        if !mint.is_initialized {
            return Err(Rejection::Uninitialized);
        }
        if self.config.reject_freeze_authority
            && let Some(authority) = &mint.freeze_authority
        {
            return Err(Rejection::FreezeAuthority(authority.clone()));
        }
        if mint.decimals > self.config.max_decimals {
            return Err(Rejection::TooManyDecimals(mint.decimals));
        }

        Ok(mint)
    }

    /// Apply the policy, including the missing-metadata rule.
    ///
    /// `Ok(None)` means no metadata was available and the policy allows that.
    pub fn check(&self, info: Option<&ResourceInfo>) -> Result<Option<MintInfo>, Rejection> {
        match info {
            Some(info) => self.evaluate(info).map(Some),
            None if self.config.require_metadata => Err(Rejection::MissingMetadata),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ValidationGate for MintPolicyGate {
    async fn validate(&self, resource_id: &str, info: Option<&ResourceInfo>) -> bool {
        match self.check(info) {
            Ok(_) => true,
            Err(reason) => {
                debug!("Gate rejected {}: {}", resource_id, reason);
                false
            }
        }
    }
}
