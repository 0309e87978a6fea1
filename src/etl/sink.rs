//! Balance resolver
//!
//! Applies decoded transfers to the ledger: read the latest balance of both
//! parties, move the amount, append one record per party. The two inserts are
//! independent; a failed insert is logged and the batch carries on.
//!
//! The zero address is the issuance account. A mint (sender is zero) grows
//! its value and a burn (receiver is zero) shrinks it, so its record tracks
//! net supply issued and never goes negative on a well-formed stream.

use primitive_types::U256;
use std::sync::Arc;

use crate::etl::decoder::{is_zero_address, TransferEvent};
use crate::etl::storage::{current_balance, BalanceRecord, BalanceStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("balance lookup for {address} failed: {source}")]
    Lookup {
        address: String,
        #[source]
        source: StoreError,
    },
    #[error("ledger corrupted: {0}")]
    CorruptBalance(#[source] StoreError),
    #[error(
        "balance of {address} would go negative at block {block_number} log {log_index}: \
         {balance} - {amount}"
    )]
    NegativeBalance {
        address: String,
        balance: U256,
        amount: U256,
        block_number: u64,
        log_index: u64,
    },
    #[error("balance of {address} overflows 256 bits at block {block_number} log {log_index}")]
    Overflow {
        address: String,
        block_number: u64,
        log_index: u64,
    },
}

impl ResolveError {
    /// Integrity faults stop the token's stream; lookups only abort the batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Lookup { .. })
    }
}

/// What one batch did to the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub events: usize,
    pub records_written: usize,
    pub insert_failures: usize,
}

/// Writes balance records for one token.
///
/// Only the worker owning `token_name` may drive this resolver: the read of
/// the previous balance and the write of the next one are not atomic.
pub struct BalanceResolver {
    token_name: String,
    store: Arc<dyn BalanceStore>,
}

impl BalanceResolver {
    pub fn new(token_name: impl Into<String>, store: Arc<dyn BalanceStore>) -> Self {
        Self {
            token_name: token_name.into(),
            store,
        }
    }

    pub fn token_name(&self) -> &str {
        &self.token_name
    }

    async fn balance_of(&self, address: &str) -> Result<U256, ResolveError> {
        current_balance(self.store.as_ref(), &self.token_name, address)
            .await
            .map_err(|source| match source {
                StoreError::CorruptBalance { .. } => ResolveError::CorruptBalance(source),
                source => ResolveError::Lookup {
                    address: address.to_string(),
                    source,
                },
            })
    }

    fn debit(event: &TransferEvent, address: &str, balance: U256) -> Result<U256, ResolveError> {
        balance
            .checked_sub(event.amount)
            .ok_or_else(|| ResolveError::NegativeBalance {
                address: address.to_string(),
                balance,
                amount: event.amount,
                block_number: event.block_number,
                log_index: event.log_index,
            })
    }

    fn credit(event: &TransferEvent, address: &str, balance: U256) -> Result<U256, ResolveError> {
        balance
            .checked_add(event.amount)
            .ok_or_else(|| ResolveError::Overflow {
                address: address.to_string(),
                block_number: event.block_number,
                log_index: event.log_index,
            })
    }

    fn record(&self, event: &TransferEvent, address: &str, balance: U256) -> BalanceRecord {
        BalanceRecord {
            token_name: self.token_name.clone(),
            address: address.to_string(),
            block_number: event.block_number,
            log_index: event.log_index,
            contract_address: event.contract_address.clone(),
            block_hash: event.block_hash.clone(),
            transaction_hash: event.transaction_hash.clone(),
            transaction_index: event.transaction_index,
            balance: balance.to_string(),
        }
    }

    /// Apply one transfer. Returns how many of the two records were written.
    pub async fn apply(&self, event: &TransferEvent) -> Result<usize, ResolveError> {
        let from_balance = self.balance_of(&event.from).await?;
        let to_balance = self.balance_of(&event.to).await?;

        let new_from = if is_zero_address(&event.from) {
            Self::credit(event, &event.from, from_balance)?
        } else {
            Self::debit(event, &event.from, from_balance)?
        };
        let new_to = if is_zero_address(&event.to) {
            Self::debit(event, &event.to, to_balance)?
        } else {
            Self::credit(event, &event.to, to_balance)?
        };

        let mut written = 0;
        for record in [
            self.record(event, &event.from, new_from),
            self.record(event, &event.to, new_to),
        ] {
            match self.store.insert(&record).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::error!(
                        target: "erc20_ledger::sink",
                        token = %self.token_name,
                        address = %record.address,
                        block = record.block_number,
                        log_index = record.log_index,
                        error = %e,
                        "Failed to insert balance record"
                    );
                }
            }
        }

        Ok(written)
    }

    /// Apply a decoded batch in order, stopping at the first lookup or
    /// integrity error.
    pub async fn apply_batch(
        &self,
        events: &[TransferEvent],
    ) -> Result<ApplySummary, ResolveError> {
        let mut summary = ApplySummary::default();
        for event in events {
            let written = self.apply(event).await?;
            summary.events += 1;
            summary.records_written += written;
            summary.insert_failures += 2 - written;
        }
        Ok(summary)
    }
}
