//! Balance ledger storage
//!
//! The ledger is append-only: every accepted Transfer writes one row for the
//! sender and one for the receiver, and the row with the greatest
//! `(block_number, log_index)` for a `(token_name, address)` pair is the
//! current balance. Rows are only ever deleted by worker recovery, one whole
//! block at a time.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use primitive_types::U256;
use std::time::Duration;

pub use memory::MemoryBalanceStore;
pub use sql::{SqlBalanceStore, SqlStoreConfig};

/// Per-request timeout applied to every store call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One ledger row: the balance of `address` right after the log at
/// `(block_number, log_index)` was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    pub token_name: String,
    pub address: String,
    pub block_number: u64,
    pub log_index: u64,
    pub contract_address: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u64,
    /// Base-10 encoded balance, as persisted.
    pub balance: String,
}

impl BalanceRecord {
    /// Parse the persisted decimal balance.
    pub fn amount(&self) -> Result<U256, StoreError> {
        U256::from_dec_str(&self.balance).map_err(|_| StoreError::CorruptBalance {
            token: self.token_name.clone(),
            address: self.address.clone(),
            value: self.balance.clone(),
        })
    }

    /// Ledger position used for "latest" ordering.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("store request timed out after {0:?}")]
    Timeout(Duration),
    #[error("stored balance {value:?} for {address} ({token}) is not a decimal integer")]
    CorruptBalance {
        token: String,
        address: String,
        value: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record already exists: {0}")]
    Duplicate(String),
}

/// Read/write contract between the ledger pipeline and durable storage.
///
/// Implementations are shared by all token workers; each worker only touches
/// rows carrying its own `token_name`, so no cross-worker locking is needed.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Latest record for `(token, address)` ordered by block then log index.
    async fn latest_balance(
        &self,
        token: &str,
        address: &str,
    ) -> Result<Option<BalanceRecord>, StoreError>;

    /// Highest block number recorded for `token`.
    async fn max_block(&self, token: &str) -> Result<Option<u64>, StoreError>;

    /// Delete every record of `token` at `block`, returning the number removed.
    async fn delete_block(&self, token: &str, block: u64) -> Result<u64, StoreError>;

    /// Append one record.
    async fn insert(&self, record: &BalanceRecord) -> Result<(), StoreError>;
}

/// Resolve the current balance of `address`, defaulting to zero when the
/// ledger has never seen it.
pub async fn current_balance<S: BalanceStore + ?Sized>(
    store: &S,
    token: &str,
    address: &str,
) -> Result<U256, StoreError> {
    match store.latest_balance(token, address).await? {
        Some(record) => record.amount(),
        None => Ok(U256::zero()),
    }
}
