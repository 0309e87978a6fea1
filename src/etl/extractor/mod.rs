//! `eth_getLogs` extraction
//!
//! Builds one JSON-RPC request per block range, sends it over an injected
//! [`RpcTransport`] and decodes the reply into a [`LogBatch`].
//!
//! # Wire format
//!
//! ```text
//! {"jsonrpc":"2.0","method":"eth_getLogs","id":1,
//!  "params":[{"topics":["<transfer>"],"fromBlock":"0x..","toBlock":"0x..","address":"<contract>"}]}
//! ```

pub mod retry;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use retry::RetryPolicy;
pub use transport::{HttpTransport, RpcTransport, TransportError};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub const METHOD_GET_LOGS: &str = "eth_getLogs";

/// Request id used for every call; the response must echo it.
pub const RPC_REQUEST_ID: u64 = 1;

/// Inclusive span of blocks fetched by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    /// `block_step` blocks starting at `from_block`.
    pub fn new(from_block: u64, block_step: u64) -> Self {
        Self {
            from_block,
            to_block: from_block.saturating_add(block_step.max(1) - 1),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    id: u64,
    params: [LogFilter<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFilter<'a> {
    topics: [&'static str; 1],
    from_block: String,
    to_block: String,
    address: &'a str,
}

/// One entry of an `eth_getLogs` result, fields kept as the node sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawLog {
    pub address: String,
    pub block_hash: String,
    pub block_number: String,
    pub data: String,
    pub log_index: String,
    pub removed: bool,
    pub topics: Vec<String>,
    pub transaction_hash: String,
    pub transaction_index: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcLogResponse {
    id: u64,
    #[serde(default)]
    result: Option<Vec<RawLog>>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Logs returned for one block range, queued between fetch and decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub range: BlockRange,
    pub logs: Vec<RawLog>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to marshal request body: {0}")]
    Marshal(#[source] serde_json::Error),
    #[error("rpc call failed: {0}")]
    Transport(#[from] TransportError),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to decode rpc response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("jsonrpc id mismatch: expected {expected}, got {got}")]
    IdMismatch { expected: u64, got: u64 },
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcErrorObject),
}

/// Fetches Transfer logs of one contract.
pub struct LogFetcher {
    transport: Arc<dyn RpcTransport>,
    contract_address: String,
    timeout: Option<Duration>,
}

impl LogFetcher {
    pub fn new(transport: Arc<dyn RpcTransport>, contract_address: impl Into<String>) -> Self {
        Self {
            transport,
            contract_address: contract_address.into(),
            timeout: None,
        }
    }

    /// Bound every call, whatever the transport does on its own.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn contract_address(&self) -> &str {
        &self.contract_address
    }

    /// Serialize the `eth_getLogs` request for `range`.
    pub fn request_body(&self, range: BlockRange) -> Result<Vec<u8>, FetchError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: METHOD_GET_LOGS,
            id: RPC_REQUEST_ID,
            params: [LogFilter {
                topics: [TRANSFER_EVENT_TOPIC],
                from_block: format!("{:#x}", range.from_block),
                to_block: format!("{:#x}", range.to_block),
                address: &self.contract_address,
            }],
        };
        serde_json::to_vec(&request).map_err(FetchError::Marshal)
    }

    /// Perform one `eth_getLogs` call for `range`.
    pub async fn fetch(&self, range: BlockRange) -> Result<LogBatch, FetchError> {
        let body = self.request_body(range)?;

        tracing::debug!(
            target: "erc20_ledger::extractor",
            contract = %self.contract_address,
            from_block = range.from_block,
            to_block = range.to_block,
            "Requesting logs"
        );

        let call = self.transport.post_json(body);
        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| FetchError::Timeout(limit))??,
            None => call.await?,
        };
        let logs = Self::parse_response(&response)?;

        tracing::debug!(
            target: "erc20_ledger::extractor",
            from_block = range.from_block,
            to_block = range.to_block,
            logs = logs.len(),
            "Received logs"
        );

        Ok(LogBatch { range, logs })
    }

    fn parse_response(body: &[u8]) -> Result<Vec<RawLog>, FetchError> {
        let response: RpcLogResponse = serde_json::from_slice(body).map_err(FetchError::Decode)?;

        if response.id != RPC_REQUEST_ID {
            return Err(FetchError::IdMismatch {
                expected: RPC_REQUEST_ID,
                got: response.id,
            });
        }
        if let Some(error) = response.error {
            return Err(FetchError::Rpc(error));
        }

        Ok(response.result.unwrap_or_default())
    }
}
