//! # Block Range Service
//!
//! Runs streaming sessions to a single outcome and builds sharded fetches
//! and batched, resumable sync on top of them.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use zb_telemetry::{
    GaugeGuard, HistogramTimer, ACTIVE_SESSIONS, BLOCKS_RECEIVED, RETRIES, SESSIONS,
    SESSION_DURATION, SYNCED_HEIGHT, TRANSACTIONS_FLATTENED,
};

use crate::algorithms::{
    build_block_range_checked, chunk_range, flatten_transactions, merge_completed, split_range,
    BlockAssembler, ProgressCounter, RangeValidation,
};
use crate::config::StreamConfig;
use crate::domain::{
    BlockRange, CompactBlock, Height, StreamError, StreamEvent, StreamOutcome, SyncReport,
};
use crate::ports::{BlockConsumer, BlockRangeApi, BlockStream, CompactTxStreamer};

/// Cancels a running session from anywhere.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(Arc::new(tx)), rx)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// One range, one stream, one store.
#[derive(Debug)]
pub struct RangeSession {
    stream: BlockStream,
    assembler: BlockAssembler,
    deadline: Option<Instant>,
    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
}

impl RangeSession {
    /// Wrap an open stream. The deadline counts from now.
    pub fn new(range: BlockRange, stream: BlockStream, deadline: Option<Duration>) -> Self {
        let (cancel, cancel_rx) = CancelHandle::new();
        Self {
            stream,
            assembler: BlockAssembler::new(range),
            deadline: deadline.map(|d| Instant::now() + d),
            cancel,
            cancel_rx,
        }
    }

    /// Handle that cancels this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Live count of data events consumed.
    pub fn progress(&self) -> ProgressCounter {
        self.assembler.progress()
    }

    /// Requested range.
    pub fn range(&self) -> &BlockRange {
        self.assembler.range()
    }

    /// Drive the session to its single outcome.
    pub async fn run(mut self) -> StreamOutcome {
        let timer = HistogramTimer::new(&SESSION_DURATION);
        let active = GaugeGuard::new(&ACTIVE_SESSIONS);

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = wait_cancelled(&mut self.cancel_rx) => {
                    self.stream.cancel();
                    break self.assembler.fail(StreamError::Cancelled);
                }
                _ = deadline_elapsed(self.deadline) => {
                    self.stream.cancel();
                    break self.assembler.fail(StreamError::DeadlineExceeded);
                }
                event = self.stream.next_event() => event.unwrap_or(StreamEvent::End),
            };
            if matches!(event, StreamEvent::Data(_)) {
                BLOCKS_RECEIVED.inc();
            }
            if let Some(outcome) = self.assembler.on_event(event) {
                break Some(outcome);
            }
        };
        // The assembler resolves exactly once; a fresh one always yields Some.
        let outcome = outcome.unwrap_or(StreamOutcome::Failed(StreamError::Cancelled));

        drop(active);
        SESSIONS.with_label_values(&[outcome.label()]).inc();

        let (start, end) = self.assembler.range().bounds();
        let blocks_processed = self.assembler.progress().blocks_processed();
        match &outcome {
            StreamOutcome::Completed(blocks) => info!(
                start,
                end,
                blocks = blocks.len(),
                elapsed_secs = timer.elapsed_secs(),
                "[zb-stream] range completed"
            ),
            StreamOutcome::Failed(e) => warn!(
                start,
                end,
                blocks_processed,
                error = %e,
                "[zb-stream] range failed"
            ),
        }
        outcome
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Block Range Service - sessions, sharded fetch and batched sync.
pub struct BlockRangeService<S: CompactTxStreamer> {
    /// Configuration.
    config: StreamConfig,
    /// Node connection.
    streamer: Arc<S>,
}

impl<S: CompactTxStreamer> BlockRangeService<S> {
    /// Create a service over `streamer`.
    pub fn new(config: StreamConfig, streamer: S) -> Self {
        Self::with_shared(config, Arc::new(streamer))
    }

    /// Create a service over a shared connection.
    pub fn with_shared(config: StreamConfig, streamer: Arc<S>) -> Self {
        Self { config, streamer }
    }

    /// Configuration in use.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Node connection.
    pub fn streamer(&self) -> &S {
        &self.streamer
    }

    /// Validate the range and open a session over it. `InvalidRange` is
    /// returned before any call is made.
    pub async fn open_session(
        &self,
        start: Height,
        end: Height,
    ) -> Result<RangeSession, StreamError> {
        let range = build_block_range_checked(start, end, self.config.validation)?;
        self.open_range(range).await
    }

    async fn open_range(&self, range: BlockRange) -> Result<RangeSession, StreamError> {
        debug!(range = ?range.bounds(), endpoint = %self.streamer.endpoint(), "[zb-stream] opening session");
        let stream = self.streamer.get_block_range(range.clone()).await?;
        Ok(RangeSession::new(range, stream, self.config.deadline()))
    }

    async fn run_range(&self, range: BlockRange) -> StreamOutcome {
        match self.open_range(range).await {
            Ok(session) => session.run().await,
            Err(e) => rejected(e),
        }
    }

    /// Fetch a range, resuming chunk by chunk after retryable failures.
    async fn fetch_with_retry(
        &self,
        chunk: &BlockRange,
        report: &mut SyncReport,
    ) -> Result<Vec<CompactBlock>, StreamError> {
        let mut attempt = 0u32;
        loop {
            match self.run_range(chunk.clone()).await.into_result() {
                Ok(blocks) => return Ok(blocks),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    report.retries += 1;
                    RETRIES.inc();
                    let backoff = self.config.retry_backoff(attempt);
                    warn!(
                        range = ?chunk.bounds(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "[zb-stream] stream disconnected, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn deliver(
        &self,
        blocks: &[CompactBlock],
        consumer: &mut dyn BlockConsumer,
        report: &mut SyncReport,
    ) -> Result<(), StreamError> {
        let batch = flatten_transactions(blocks);
        let pool = self.config.pool;
        let transactions = batch.transactions.len() as u64;
        let actions = if pool.sync_orchard() {
            batch.orchard_actions().count() as u64
        } else {
            0
        };
        let outputs = if pool.sync_sapling() {
            batch.sapling_outputs().count() as u64
        } else {
            0
        };
        let (batch_start, batch_end) = (batch.start_height, batch.end_height);

        consumer.consume(batch).await?;

        report.blocks_processed += blocks.len() as u64;
        report.transactions_processed += transactions;
        report.actions_processed += actions;
        report.outputs_processed += outputs;
        report.batches += 1;
        report.last_height = Some(batch_end);
        TRANSACTIONS_FLATTENED.inc_by(transactions as f64);
        SYNCED_HEIGHT.set(batch_end as f64);
        debug!(batch_start, batch_end, transactions, "[zb-stream] batch delivered");
        Ok(())
    }
}

fn rejected(error: StreamError) -> StreamOutcome {
    let outcome = StreamOutcome::Failed(error);
    SESSIONS.with_label_values(&[outcome.label()]).inc();
    outcome
}

#[async_trait]
impl<S: CompactTxStreamer + 'static> BlockRangeApi for BlockRangeService<S> {
    async fn fetch_range(&self, start: Height, end: Height) -> StreamOutcome {
        match self.open_session(start, end).await {
            Ok(session) => session.run().await,
            Err(e) => rejected(e),
        }
    }

    async fn fetch_sharded(&self, start: Height, end: Height, shards: usize) -> StreamOutcome {
        let parts = match build_block_range_checked(start, end, RangeValidation::Strict)
            .and_then(|range| split_range(&range, shards))
        {
            Ok(parts) => parts,
            Err(e) => return rejected(e),
        };

        let mut sessions = Vec::with_capacity(parts.len());
        for part in parts {
            match self.open_range(part).await {
                Ok(session) => sessions.push(session),
                Err(e) => return rejected(e),
            }
        }
        info!(start, end, shards = sessions.len(), "[zb-stream] sharded fetch");

        let handles: Vec<CancelHandle> = sessions.iter().map(RangeSession::cancel_handle).collect();
        let mut running: FuturesUnordered<_> = sessions.into_iter().map(RangeSession::run).collect();

        let mut completed = Vec::with_capacity(handles.len());
        let mut first_error = None;
        while let Some(outcome) = running.next().await {
            match outcome {
                StreamOutcome::Completed(blocks) => completed.push(blocks),
                StreamOutcome::Failed(e) => {
                    if first_error.is_none() {
                        // One failed shard fails the fetch; stop the rest.
                        handles.iter().for_each(CancelHandle::cancel);
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => StreamOutcome::Failed(e),
            None => StreamOutcome::Completed(merge_completed(completed)),
        }
    }

    async fn latest_height(&self) -> Result<Height, StreamError> {
        let tip = self.streamer.get_latest_block().await?;
        debug!(height = tip.height, "[zb-stream] latest block");
        Ok(tip.height)
    }

    async fn sync_range(
        &self,
        start: Height,
        end: Height,
        consumer: &mut dyn BlockConsumer,
    ) -> Result<SyncReport, StreamError> {
        let started = Instant::now();
        let range = build_block_range_checked(start, end, RangeValidation::Strict)?;
        let mut report = SyncReport::default();

        let network = self.config.network;
        let pool = self.config.pool;
        info!(
            start,
            end,
            batch_size = self.config.block_batch_size,
            network = ?network,
            pool = ?pool,
            "[zb-stream] sync started"
        );
        let activation = network.activation_height(pool);
        if end < activation {
            warn!(
                end,
                activation,
                network = ?network,
                pool = ?pool,
                "[zb-stream] range ends before pool activation, no notes to scan"
            );
        }
        for chunk in chunk_range(&range, self.config.block_batch_size)? {
            let blocks = self.fetch_with_retry(&chunk, &mut report).await?;
            self.deliver(&blocks, consumer, &mut report).await?;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            blocks = report.blocks_processed,
            transactions = report.transactions_processed,
            retries = report.retries,
            elapsed_ms = report.elapsed_ms,
            "[zb-stream] sync finished"
        );
        Ok(report)
    }
}
