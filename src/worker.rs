//! Token worker
//!
//! One worker per configured token. It recovers its cursor from the ledger,
//! then runs two loops joined by a bounded queue:
//!
//! - the fetch loop ticks every `poll_interval`, fetches one block range and
//!   advances the cursor by `block_step` whether or not the fetch worked;
//! - the drain loop decodes queued batches and applies them to the ledger in
//!   fetch order.
//!
//! Cancelling the shutdown token stops the fetch loop at once. The drain loop
//! finishes the batches already queued, then the worker reports `Stopped`.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::TokenConfig;
use crate::etl::decoder::TransferDecoder;
use crate::etl::extractor::{BlockRange, LogBatch, LogFetcher, RetryPolicy, RpcTransport};
use crate::etl::sink::{BalanceResolver, ResolveError};
use crate::etl::storage::{BalanceStore, StoreError};

/// Batches that may wait between fetch and decode before the fetch loop blocks.
pub const QUEUE_CAPACITY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Next block range a worker will fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub from_block: u64,
    pub block_step: u64,
}

impl Cursor {
    pub fn new(from_block: u64, block_step: u64) -> Self {
        Self {
            from_block,
            block_step: block_step.max(1),
        }
    }

    pub fn range(&self) -> BlockRange {
        BlockRange::new(self.from_block, self.block_step)
    }

    pub fn advance(&mut self) {
        self.from_block = self.from_block.saturating_add(self.block_step);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("recovery failed: {0}")]
    Recovery(#[source] StoreError),
    #[error("ledger integrity fault: {0}")]
    Integrity(#[source] ResolveError),
    #[error("drain task failed: {0}")]
    Drain(#[from] JoinError),
}

pub struct TokenWorker {
    config: TokenConfig,
    fetcher: LogFetcher,
    retry: RetryPolicy,
    store: Arc<dyn BalanceStore>,
    state: watch::Sender<WorkerState>,
}

impl TokenWorker {
    pub fn new(
        config: TokenConfig,
        transport: Arc<dyn RpcTransport>,
        store: Arc<dyn BalanceStore>,
    ) -> Self {
        let fetcher = LogFetcher::new(transport, config.contract_address.clone())
            .with_timeout(config.rpc_timeout());
        let retry = config.retry_policy();
        let (state, _) = watch::channel(WorkerState::Initializing);

        Self {
            config,
            fetcher,
            retry,
            store,
            state,
        }
    }

    pub fn token_name(&self) -> &str {
        &self.config.name
    }

    /// Observe state transitions; valid before and during [`Self::run`].
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
        tracing::debug!(
            target: "erc20_ledger::worker",
            token = %self.config.name,
            ?state,
            "State changed"
        );
    }

    /// Derive the starting cursor from the ledger.
    ///
    /// The highest recorded block may be half written, so all of its rows are
    /// dropped and fetching resumes at that block. A complete block cannot be
    /// told apart from a torn one, so every discard is logged at `warn`:
    /// repeated restarts before the first tick each drop one more block.
    pub async fn recover(&self) -> Result<Cursor, StoreError> {
        let token = &self.config.name;

        let Some(block) = self.store.max_block(token).await? else {
            tracing::info!(
                target: "erc20_ledger::worker",
                token = %token,
                from_block = self.config.from_block,
                "Empty ledger, starting from configured block"
            );
            return Ok(Cursor::new(self.config.from_block, self.config.block_step));
        };

        let removed = self.store.delete_block(token, block).await?;
        tracing::warn!(
            target: "erc20_ledger::worker",
            token = %token,
            block,
            removed,
            "Discarded last recorded block, refetching it"
        );

        Ok(Cursor::new(block, self.config.block_step))
    }

    /// Run until `shutdown` is cancelled or the ledger hits an integrity fault.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let cursor = match self.recover().await {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::error!(
                    target: "erc20_ledger::worker",
                    token = %self.config.name,
                    error = %e,
                    "Recovery failed, worker not started"
                );
                self.set_state(WorkerState::Stopped);
                return Err(WorkerError::Recovery(e));
            }
        };

        tracing::info!(
            target: "erc20_ledger::worker",
            token = %self.config.name,
            chain = self.config.chain.as_deref().unwrap_or("-"),
            contract = %self.config.contract_address,
            from_block = cursor.from_block,
            block_step = cursor.block_step,
            "Worker running"
        );
        self.set_state(WorkerState::Running);

        let stop = shutdown.child_token();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let drain = Drain {
            decoder: TransferDecoder::new(),
            resolver: BalanceResolver::new(self.config.name.clone(), self.store.clone()),
            stop: stop.clone(),
        };
        let drain_handle = tokio::spawn(drain.run(rx));

        self.fetch_loop(cursor, tx, &stop).await;

        self.set_state(WorkerState::Stopping);
        let result = match drain_handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WorkerError::Integrity(e)),
            Err(e) => Err(WorkerError::Drain(e)),
        };
        self.set_state(WorkerState::Stopped);

        tracing::info!(
            target: "erc20_ledger::worker",
            token = %self.config.name,
            "Worker stopped"
        );
        result
    }

    async fn fetch_loop(
        &self,
        mut cursor: Cursor,
        tx: mpsc::Sender<LogBatch>,
        stop: &CancellationToken,
    ) {
        let period = self.config.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let range = cursor.range();
            let fetched = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                fetched = self.retry.execute(|| self.fetcher.fetch(range)) => fetched,
            };

            match fetched {
                Ok(batch) => {
                    let sent = tokio::select! {
                        biased;
                        () = stop.cancelled() => break,
                        sent = tx.send(batch) => sent,
                    };
                    if sent.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        target: "erc20_ledger::worker",
                        token = %self.config.name,
                        from_block = range.from_block,
                        to_block = range.to_block,
                        error = %e,
                        "Fetch failed, skipping range"
                    );
                }
            }

            cursor.advance();
        }
    }
}

/// Consumer side of the batch queue.
struct Drain {
    decoder: TransferDecoder,
    resolver: BalanceResolver,
    stop: CancellationToken,
}

impl Drain {
    /// Returns once the queue is closed and empty, or on the first fatal error.
    async fn run(self, mut rx: mpsc::Receiver<LogBatch>) -> Result<(), ResolveError> {
        let token = self.resolver.token_name().to_string();

        while let Some(batch) = rx.recv().await {
            let range = batch.range;

            let events = match self.decoder.decode_batch(&batch) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(
                        target: "erc20_ledger::decoder",
                        token = %token,
                        from_block = range.from_block,
                        to_block = range.to_block,
                        error = %e,
                        "Malformed log, dropping batch"
                    );
                    continue;
                }
            };

            match self.resolver.apply_batch(&events).await {
                Ok(summary) => {
                    if summary.events > 0 {
                        tracing::info!(
                            target: "erc20_ledger::sink",
                            token = %token,
                            from_block = range.from_block,
                            to_block = range.to_block,
                            events = summary.events,
                            records = summary.records_written,
                            insert_failures = summary.insert_failures,
                            "Applied batch"
                        );
                    }
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        target: "erc20_ledger::sink",
                        token = %token,
                        from_block = range.from_block,
                        to_block = range.to_block,
                        error = %e,
                        "Integrity fault, stopping token stream"
                    );
                    self.stop.cancel();
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(
                        target: "erc20_ledger::sink",
                        token = %token,
                        from_block = range.from_block,
                        to_block = range.to_block,
                        error = %e,
                        "Balance lookup failed, aborting rest of batch"
                    );
                }
            }
        }

        Ok(())
    }
}
