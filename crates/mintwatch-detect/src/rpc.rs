//! Solana JSON-RPC implementation of [`Ledger`].
//!
//! One HTTP request per call, no retries: the poll loop owns backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mintwatch_core::{
    ActivityRecord, Error as CoreError, Ledger, ParsedTransaction, ResourceInfo,
    Result as CoreResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::trace;

use crate::Result;

/// Connection settings for [`RpcLedger`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP JSON-RPC endpoint.
    pub url: String,

    /// Commitment level for every read.
    pub commitment: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: "confirmed".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// `getAccountInfo` wraps its value in an RPC context.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: Option<T>,
}

/// Ledger backed by a Solana node.
pub struct RpcLedger {
    client: reqwest::Client,
    config: RpcConfig,
    request_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(config: RpcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> CoreResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!("RPC {} (id {})", method, request.id);

        let response: JsonRpcResponse = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CoreError::Transport(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| CoreError::Transport(format!("{method}: {e}")))?;

        if let Some(error) = response.error {
            return Err(CoreError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> CoreResult<T> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn recent_activity(&self, authority: &str, limit: usize) -> CoreResult<Vec<ActivityRecord>> {
        self.call_as(
            "getSignaturesForAddress",
            json!([authority, { "limit": limit, "commitment": self.config.commitment }]),
        )
        .await
    }

    async fn parsed_transaction(&self, signature: &str) -> CoreResult<Option<ParsedTransaction>> {
        let result = self
            .call(
                "getTransaction",
                json!([signature, {
                    "encoding": "jsonParsed",
                    "commitment": self.config.commitment,
                    "maxSupportedTransactionVersion": 0
                }]),
            )
            .await?;

        if result.is_null() {
            return Ok(None);
        }
        ParsedTransaction::from_rpc(signature, &result).map(Some)
    }

    async fn resource_info(&self, resource_id: &str) -> CoreResult<Option<ResourceInfo>> {
        let response: WithContext<ResourceInfo> = self
            .call_as(
                "getAccountInfo",
                json!([resource_id, {
                    "encoding": "jsonParsed",
                    "commitment": self.config.commitment
                }]),
            )
            .await?;
        Ok(response.value)
    }
}
