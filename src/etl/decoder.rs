//! ERC20 Transfer decoder
//!
//! Accepts a raw log as a Transfer iff it carries exactly three topics and the
//! first one is the `Transfer(address,address,uint256)` signature. Self
//! transfers are dropped. Numeric fields are decoded strictly: one bad field
//! rejects the whole batch so that a batch is either fully applied or not at
//! all.

use primitive_types::U256;

use crate::etl::extractor::{LogBatch, RawLog, TRANSFER_EVENT_TOPIC};

/// Hex digits of an Ethereum address.
pub const ADDRESS_HEX_LEN: usize = 40;

/// Hex digits of a 32-byte log topic.
pub const TOPIC_HEX_LEN: usize = 64;

/// Zero address: sender of mints, receiver of burns.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A decoded, balance-affecting Transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract_address: String,
    pub block_hash: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    pub from: String,
    pub to: String,
    pub amount: U256,
}

impl TransferEvent {
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid {field} {value:?}")]
    InvalidHex { field: &'static str, value: String },
    #[error("invalid {field} topic {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("invalid transfer amount {value:?}")]
    InvalidAmount { value: String },
}

/// Parse a quantity such as `"0xb00fd8"` (the `0x` prefix is optional).
///
/// Only hex digits are accepted after the prefix; no sign, no whitespace.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a non-negative integer, hex when `0x`-prefixed and decimal otherwise.
pub fn parse_amount(value: &str) -> Option<U256> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()) => {
            U256::from_str_radix(digits, 16).ok()
        }
        Some(_) => None,
        None if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            U256::from_dec_str(value).ok()
        }
        None => None,
    }
}

/// Reduce a 32-byte topic to its 20-byte address, lower-cased.
///
/// Accepts `0x` followed by either 64 (topic) or 40 (address) hex digits;
/// anything else is `None`.
pub fn normalize_address(value: &str) -> Option<String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))?;
    if !matches!(digits.len(), ADDRESS_HEX_LEN | TOPIC_HEX_LEN) || hex::decode(digits).is_err() {
        return None;
    }
    let tail = &digits[digits.len() - ADDRESS_HEX_LEN..];
    Some(format!("0x{}", tail.to_ascii_lowercase()))
}

/// Whether a normalized address is the zero address.
pub fn is_zero_address(address: &str) -> bool {
    address == ZERO_ADDRESS
}

/// Decoder for canonical ERC20 Transfer logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferDecoder;

impl TransferDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Shape check: three topics led by the Transfer signature.
    pub fn is_transfer(log: &RawLog) -> bool {
        log.topics.len() == 3 && log.topics[0].eq_ignore_ascii_case(TRANSFER_EVENT_TOPIC)
    }

    /// Decode one log.
    ///
    /// `Ok(None)` means the log is skipped: not a Transfer, or a self transfer.
    pub fn decode_log(&self, log: &RawLog) -> Result<Option<TransferEvent>, DecodeError> {
        if !Self::is_transfer(log) {
            tracing::trace!(
                target: "erc20_ledger::decoder",
                topics = log.topics.len(),
                block_number = %log.block_number,
                tx_hash = %log.transaction_hash,
                "Skipping non-Transfer log"
            );
            return Ok(None);
        }

        let address = |field: &'static str, value: &str| {
            normalize_address(value).ok_or_else(|| DecodeError::InvalidAddress {
                field,
                value: value.to_string(),
            })
        };
        let from = address("from", &log.topics[1])?;
        let to = address("to", &log.topics[2])?;
        if from == to {
            return Ok(None);
        }

        let hex_field = |field: &'static str, value: &str| {
            parse_hex_u64(value).ok_or_else(|| DecodeError::InvalidHex {
                field,
                value: value.to_string(),
            })
        };

        let block_number = hex_field("blockNumber", &log.block_number)?;
        let transaction_index = hex_field("transactionIndex", &log.transaction_index)?;
        let log_index = hex_field("logIndex", &log.log_index)?;
        let amount = parse_amount(&log.data).ok_or_else(|| DecodeError::InvalidAmount {
            value: log.data.clone(),
        })?;

        Ok(Some(TransferEvent {
            contract_address: log.address.clone(),
            block_hash: log.block_hash.clone(),
            block_number,
            transaction_hash: log.transaction_hash.clone(),
            transaction_index,
            log_index,
            from,
            to,
            amount,
        }))
    }

    /// Decode a whole batch, in the order the node returned it.
    ///
    /// Fails on the first malformed field; nothing from the batch is returned.
    pub fn decode_batch(&self, batch: &LogBatch) -> Result<Vec<TransferEvent>, DecodeError> {
        let mut events = Vec::with_capacity(batch.logs.len());
        for log in &batch.logs {
            if let Some(event) = self.decode_log(log)? {
                events.push(event);
            }
        }
        Ok(events)
    }
}
