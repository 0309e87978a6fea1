//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use erc20_ledger::etl::extractor::{RpcTransport, TransportError, TRANSFER_EVENT_TOPIC};
use erc20_ledger::TokenConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Route worker logs through the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_test_writer()
        .try_init();
}

pub const CONTRACT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
pub const ALICE: &str = "0x5041ed759dd4afc3a72b8192c143f72f4724081a";
pub const BOB: &str = "0xd6ea6a790fce0fa7a07d435d80aab8cf8f87b903";
pub const CAROL: &str = "0x36928500bc1dcd7af6a2b4008875cc336b927d57";
pub const ZERO: &str = "0x0000000000000000000000000000000000000000";

/// One scripted answer of the fake node.
pub enum Reply {
    Logs(Vec<Value>),
    /// Never answers; the fetch times out.
    Hang,
    Garbage,
}

/// JSON-RPC node that plays a fixed script, then cancels `done` and answers
/// every further call with an empty result.
pub struct ScriptedNode {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Value>>,
    done: CancellationToken,
}

impl ScriptedNode {
    pub fn new(script: impl IntoIterator<Item = Reply>, done: CancellationToken) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            done,
        }
    }

    /// `(fromBlock, toBlock)` of every request received, in order.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        let block = |v: &Value| {
            u64::from_str_radix(v.as_str().unwrap().trim_start_matches("0x"), 16).unwrap()
        };
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| {
                let filter = &r["params"][0];
                (block(&filter["fromBlock"]), block(&filter["toBlock"]))
            })
            .collect()
    }
}

#[async_trait]
impl RpcTransport for ScriptedNode {
    async fn post_json(&self, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let reply = {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&body).unwrap());
            self.script.lock().unwrap().pop_front()
        };

        match reply {
            Some(Reply::Logs(logs)) => Ok(rpc_result(logs)),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Garbage) => Ok(b"upstream connect error".to_vec()),
            None => {
                self.done.cancel();
                Ok(rpc_result(Vec::new()))
            }
        }
    }
}

fn rpc_result(logs: Vec<Value>) -> Vec<u8> {
    json!({"jsonrpc": "2.0", "id": 1, "result": logs})
        .to_string()
        .into_bytes()
}

/// Left-pad a 20-byte address into a 32-byte topic.
pub fn topic(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}

pub fn transfer_log(from: &str, to: &str, data: &str, block: u64, log_index: u64) -> Value {
    json!({
        "address": CONTRACT,
        "blockHash": format!("0x{block:064x}"),
        "blockNumber": format!("{block:#x}"),
        "data": data,
        "logIndex": format!("{log_index:#x}"),
        "removed": false,
        "topics": [TRANSFER_EVENT_TOPIC, topic(from), topic(to)],
        "transactionHash": format!("0x{:048x}{log_index:016x}", block),
        "transactionIndex": "0x0",
    })
}

pub fn token_config(from_block: u64, block_step: u64) -> TokenConfig {
    serde_json::from_value(json!({
        "chain": "eth-main",
        "rpc_url": "http://127.0.0.1:8545",
        "name": "USDT",
        "from_block": from_block,
        "block_step": block_step,
        "contract_address": CONTRACT,
        "poll_interval_secs": 1,
        "rpc_timeout_secs": 5,
    }))
    .unwrap()
}
