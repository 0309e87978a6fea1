//! ERC20 ledger indexer
//!
//! Loads the token list, connects the balance store and runs one worker per
//! token until SIGINT or SIGTERM. On shutdown every worker finishes the batches
//! it already fetched before the process exits.
//!
//! # Usage
//!
//! ```bash
//! # Follow every token in config.yaml, ledger in ./erc20-ledger.db
//! erc20-ledger
//!
//! # Same, against Postgres
//! LEDGER_DATABASE_URL=postgres://localhost/ledger erc20-ledger -c tokens.yaml
//!
//! # Current balance of one holder
//! erc20-ledger balance --token USDT --address 0x5041ed759dd4afc3a72b8192c143f72f4724081a
//! ```

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use config::{Cli, Command};
use erc20_ledger::etl::decoder::normalize_address;
use erc20_ledger::{
    current_balance, BalanceStore, CancellationToken, LedgerConfig, SqlBalanceStore,
    SqlStoreConfig,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let ledger_config = LedgerConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let default_level = if ledger_config.is_debug() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let database_url = cli.resolve_database_url(ledger_config.database_url.as_deref());
    let store_config = SqlStoreConfig {
        max_connections: ledger_config.max_connections,
        ..SqlStoreConfig::new(database_url)
    };
    let store = Arc::new(
        SqlBalanceStore::connect(store_config)
            .await
            .context("failed to open balance store")?,
    );
    tracing::info!(target: "erc20_ledger::main", "Balance store ready");

    let outcome = match cli.command() {
        Command::Run => run_ledger(&ledger_config, store.clone()).await,
        Command::Balance { token, address } => {
            print_balance(store.as_ref(), &token, &address).await
        }
    };

    store.close().await;
    outcome
}

async fn run_ledger(config: &LedgerConfig, store: Arc<SqlBalanceStore>) -> Result<()> {
    if config.tokens.is_empty() {
        bail!("no tokens configured");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(target: "erc20_ledger::main", error = %e, "Signal handler failed");
        }
        signal_token.cancel();
    });

    let started = erc20_ledger::run(config, store, shutdown).await;
    if started.is_empty() {
        bail!("no token passed validation, nothing to run");
    }

    tracing::info!(target: "erc20_ledger::main", "Ledger shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;

        tokio::select! {
            result = ctrl_c => {
                result.context("failed to listen for Ctrl+C")?;
                tracing::info!(
                    target: "erc20_ledger::main",
                    "Received SIGINT (Ctrl+C), draining workers..."
                );
            }
            _ = terminate.recv() => {
                tracing::info!(
                    target: "erc20_ledger::main",
                    "Received SIGTERM, draining workers..."
                );
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for Ctrl+C")?;
        tracing::info!(target: "erc20_ledger::main", "Received Ctrl+C, draining workers...");
    }

    Ok(())
}

async fn print_balance(store: &dyn BalanceStore, token: &str, address: &str) -> Result<()> {
    let address = normalize_address(address)
        .with_context(|| format!("{address:?} is not a 0x-prefixed 20-byte address"))?;
    let balance = current_balance(store, token, &address)
        .await
        .with_context(|| format!("failed to read balance of {address} for {token}"))?;

    println!("{token} {address} {balance}");
    Ok(())
}
