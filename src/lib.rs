//! ERC20 ledger - per-token balance history built from `Transfer` logs.
//!
//! Each configured token gets its own [`TokenWorker`]: it polls an Ethereum
//! JSON-RPC node with `eth_getLogs`, decodes `Transfer(address,address,uint256)`
//! logs and appends one balance snapshot per party to a shared [`BalanceStore`].
//! Tokens never interact; the only shared resource is the store.

pub mod config;
pub mod etl;
pub mod worker;

// Re-export commonly used types for embedders
pub use async_trait::async_trait;
pub use tokio;
pub use tokio_util::sync::CancellationToken;

pub use config::{ConfigError, LedgerConfig, TokenConfig};
pub use etl::storage::{
    current_balance, BalanceRecord, BalanceStore, MemoryBalanceStore, SqlBalanceStore,
    SqlStoreConfig, StoreError,
};
pub use worker::{Cursor, TokenWorker, WorkerError, WorkerState};

use std::sync::Arc;
use tokio_util::task::TaskTracker;

use etl::extractor::HttpTransport;

/// Spawn one worker per runnable token onto `tracker`.
///
/// Tokens with invalid settings are logged and left out; the rest start
/// regardless. Returns the names of the tokens that were started.
pub fn spawn_workers(
    config: &LedgerConfig,
    store: Arc<dyn BalanceStore>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) -> Vec<String> {
    let (tokens, rejected) = config.partition_tokens();
    for e in &rejected {
        tracing::error!(target: "erc20_ledger::main", error = %e, "Token not started");
    }

    let mut started = Vec::with_capacity(tokens.len());
    for token in tokens {
        let transport = match http_transport(&token) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(target: "erc20_ledger::main", error = %e, "Token not started");
                continue;
            }
        };

        let name = token.name.clone();
        let worker = TokenWorker::new(token, Arc::new(transport), store.clone());
        let shutdown = shutdown.clone();
        let task_name = name.clone();
        tracker.spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!(
                    target: "erc20_ledger::main",
                    token = %task_name,
                    error = %e,
                    "Worker exited with error"
                );
            }
        });
        started.push(name);
    }

    started
}

fn http_transport(token: &TokenConfig) -> Result<HttpTransport, ConfigError> {
    let url = token.validate()?;
    HttpTransport::new(url, token.rpc_timeout()).map_err(|e| ConfigError::Transport {
        token: token.name.clone(),
        reason: e.to_string(),
    })
}

/// Run every configured token until `shutdown` is cancelled.
///
/// Returns once all workers have drained their queues and stopped. Workers
/// that stop on their own (recovery failure, integrity fault) do not affect
/// the others.
pub async fn run(
    config: &LedgerConfig,
    store: Arc<dyn BalanceStore>,
    shutdown: CancellationToken,
) -> Vec<String> {
    let tracker = TaskTracker::new();
    let started = spawn_workers(config, store, &shutdown, &tracker);

    tracing::info!(
        target: "erc20_ledger::main",
        "Started {} worker(s): {}",
        started.len(),
        started.join(", ")
    );

    tracker.close();
    tracker.wait().await;

    tracing::info!(target: "erc20_ledger::main", "All workers stopped");
    started
}
