pub mod decoder;
pub mod extractor;
pub mod sink;
pub mod storage;

pub use decoder::{DecodeError, TransferDecoder, TransferEvent};
pub use extractor::{
    BlockRange, FetchError, HttpTransport, LogBatch, LogFetcher, RawLog, RetryPolicy,
    RpcTransport,
};
pub use sink::{ApplySummary, BalanceResolver, ResolveError};
pub use storage::{BalanceRecord, BalanceStore, MemoryBalanceStore, SqlBalanceStore, StoreError};
