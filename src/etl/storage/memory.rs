//! In-process balance store.
//!
//! Same semantics as [`SqlBalanceStore`](super::SqlBalanceStore), backed by a
//! vector. Used by tests and dry runs; supports failure injection so error
//! paths of the pipeline can be exercised without a database.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{BalanceRecord, BalanceStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<BalanceRecord>,
    unavailable: bool,
    failing_inserts: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBalanceStore {
    inner: Mutex<Inner>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`, inserted in order.
    pub fn with_records(records: impl IntoIterator<Item = BalanceRecord>) -> Self {
        let store = Self::new();
        store.lock().records.extend(records);
        store
    }

    /// Snapshot of every record in insertion order.
    pub fn records(&self) -> Vec<BalanceRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make inserts for `address` fail while other inserts succeed.
    pub fn fail_inserts_for(&self, address: &str) {
        self.lock().failing_inserts.insert(address.to_lowercase());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(inner: &Inner) -> Result<(), StoreError> {
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn latest_balance(
        &self,
        token: &str,
        address: &str,
    ) -> Result<Option<BalanceRecord>, StoreError> {
        let inner = self.lock();
        Self::check(&inner)?;
        // max_by_key keeps the last maximum, matching insertion order on ties.
        Ok(inner
            .records
            .iter()
            .filter(|r| r.token_name == token && r.address == address)
            .max_by_key(|r| r.position())
            .cloned())
    }

    async fn max_block(&self, token: &str) -> Result<Option<u64>, StoreError> {
        let inner = self.lock();
        Self::check(&inner)?;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.token_name == token)
            .map(|r| r.block_number)
            .max())
    }

    async fn delete_block(&self, token: &str, block: u64) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        let before = inner.records.len();
        inner
            .records
            .retain(|r| !(r.token_name == token && r.block_number == block));
        Ok((before - inner.records.len()) as u64)
    }

    async fn insert(&self, record: &BalanceRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        Self::check(&inner)?;
        if inner.failing_inserts.contains(&record.address.to_lowercase()) {
            return Err(StoreError::Unavailable(format!(
                "insert rejected for {}",
                record.address
            )));
        }
        let duplicate = inner.records.iter().any(|r| {
            r.token_name == record.token_name
                && r.address == record.address
                && r.position() == record.position()
        });
        if duplicate {
            return Err(StoreError::Duplicate(format!(
                "{} at {:?}",
                record.address,
                record.position()
            )));
        }
        inner.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, address: &str, block: u64, log: u64, balance: &str) -> BalanceRecord {
        BalanceRecord {
            token_name: token.to_string(),
            address: address.to_string(),
            block_number: block,
            log_index: log,
            contract_address: "0xc0".to_string(),
            block_hash: format!("0xb{block}"),
            transaction_hash: format!("0xt{block}{log}"),
            transaction_index: 0,
            balance: balance.to_string(),
        }
    }

    #[tokio::test]
    async fn test_latest_orders_by_block_then_log() {
        let store = MemoryBalanceStore::with_records([
            record("USDT", "0xa", 5, 3, "30"),
            record("USDT", "0xa", 7, 1, "71"),
            record("USDT", "0xa", 7, 0, "70"),
            record("USDT", "0xa", 6, 9, "69"),
            record("DAI", "0xa", 9, 0, "999"),
        ]);

        let latest = store.latest_balance("USDT", "0xa").await.unwrap().unwrap();
        assert_eq!(latest.balance, "71");
        assert!(store.latest_balance("USDT", "0xb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_block_is_token_scoped() {
        let store = MemoryBalanceStore::with_records([
            record("USDT", "0xa", 7, 0, "1"),
            record("USDT", "0xb", 7, 0, "2"),
            record("USDT", "0xa", 6, 0, "3"),
            record("DAI", "0xa", 7, 0, "4"),
        ]);

        assert_eq!(store.max_block("USDT").await.unwrap(), Some(7));
        assert_eq!(store.delete_block("USDT", 7).await.unwrap(), 2);
        assert_eq!(store.max_block("USDT").await.unwrap(), Some(6));
        assert_eq!(store.max_block("DAI").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryBalanceStore::new();
        store.fail_inserts_for("0xA");
        assert!(store.insert(&record("USDT", "0xa", 1, 0, "1")).await.is_err());
        store.insert(&record("USDT", "0xb", 1, 0, "1")).await.unwrap();
        assert!(store.insert(&record("USDT", "0xb", 1, 0, "2")).await.is_err());

        store.set_unavailable(true);
        assert!(store.max_block("USDT").await.is_err());
    }
}
