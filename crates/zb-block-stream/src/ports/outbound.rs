//! # Outbound Ports
//!
//! Traits for external dependencies: the compact block node and the
//! downstream transaction consumer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::stream::{block_stream_channel, BlockStream, StreamSender, DEFAULT_EVENT_BUFFER};
use crate::domain::{
    BlockId, BlockRange, CompactBlock, CompactOrchardAction, CompactSaplingOutput, CompactTx,
    Height, RpcCode, RpcStatus, StreamError, TransactionBatch, COMPACT_NOTE_SIZE, HASH_SIZE,
};

/// Compact block node - outbound port.
///
/// Implementations must honor the `StreamSender` contract: data events,
/// at most one status, then end.
#[async_trait]
pub trait CompactTxStreamer: Send + Sync {
    /// Start a server-streaming `GetBlockRange` call.
    async fn get_block_range(&self, range: BlockRange) -> Result<BlockStream, StreamError>;

    /// Unary `GetLatestBlock` call.
    async fn get_latest_block(&self) -> Result<BlockId, StreamError>;

    /// Endpoint identifier (for logging).
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: CompactTxStreamer + ?Sized> CompactTxStreamer for Arc<T> {
    async fn get_block_range(&self, range: BlockRange) -> Result<BlockStream, StreamError> {
        (**self).get_block_range(range).await
    }

    async fn get_latest_block(&self) -> Result<BlockId, StreamError> {
        (**self).get_latest_block().await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Downstream consumer of flattened transactions (trial decryption,
/// commitment tree updates).
#[async_trait]
pub trait BlockConsumer: Send {
    /// Consume one height-ordered batch.
    async fn consume(&mut self, batch: TransactionBatch) -> Result<(), StreamError>;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Order in which the mock delivers a range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MockDelivery {
    /// Ascending heights.
    #[default]
    Ascending,
    /// Descending heights.
    Reversed,
    /// Odd offsets first, then even offsets.
    Interleaved,
}

/// Mock compact block node for testing.
///
/// Serves synthetic blocks up to `tip_height`; ranges past the tip are
/// rejected with `OUT_OF_RANGE` like lightwalletd does.
#[derive(Clone, Debug)]
pub struct MockCompactTxStreamer {
    /// Chain tip height.
    pub tip_height: Height,
    /// Delivery order.
    pub delivery: MockDelivery,
    /// Send every block twice.
    pub duplicate: bool,
    /// Terminate with `failure` after this many data events.
    pub fail_after: Option<usize>,
    /// Status used for injected failures.
    pub failure: RpcStatus,
    /// Number of upcoming calls that get the injected failure; `None`
    /// applies it to every call.
    pub failing_calls: Option<Arc<AtomicUsize>>,
    /// Close the body without a status.
    pub omit_status: bool,
    /// Pause between events.
    pub delay: Option<Duration>,
    /// Calls made so far.
    pub calls: Arc<AtomicUsize>,
    /// Ranges requested, in call order.
    pub requests: Arc<Mutex<Vec<(Height, Height)>>>,
}

impl Default for MockCompactTxStreamer {
    fn default() -> Self {
        Self {
            tip_height: 2_000_000,
            delivery: MockDelivery::Ascending,
            duplicate: false,
            fail_after: None,
            failure: RpcStatus::new(RpcCode::Unavailable, "mock connection reset"),
            failing_calls: None,
            omit_status: false,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockCompactTxStreamer {
    /// Mock whose chain ends at `tip_height`.
    pub fn with_tip(tip_height: Height) -> Self {
        Self {
            tip_height,
            ..Default::default()
        }
    }

    /// Fail only the next `calls` calls after `after` blocks each.
    pub fn failing_first(mut self, calls: usize, after: usize) -> Self {
        self.fail_after = Some(after);
        self.failing_calls = Some(Arc::new(AtomicUsize::new(calls)));
        self
    }

    /// Number of `get_block_range` calls served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requested ranges, in call order.
    pub fn requested_ranges(&self) -> Vec<(Height, Height)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn take_failure(&self) -> Option<usize> {
        let after = self.fail_after?;
        match &self.failing_calls {
            None => Some(after),
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()
                .map(|_| after),
        }
    }

    fn delivery_order(&self, start: Height, end: Height) -> Vec<Height> {
        let mut heights: Vec<Height> = (start..=end).collect();
        match self.delivery {
            MockDelivery::Ascending => {}
            MockDelivery::Reversed => heights.reverse(),
            MockDelivery::Interleaved => {
                let (odd, even): (Vec<Height>, Vec<Height>) =
                    heights.into_iter().partition(|h| (h - start) % 2 == 1);
                heights = odd.into_iter().chain(even).collect();
            }
        }
        heights
    }

    async fn serve(self, range: BlockRange, mut tx: StreamSender, fail_after: Option<usize>) {
        let (start, end) = range.bounds();
        if start > end || end > self.tip_height {
            let _ = tx
                .status(RpcStatus::new(
                    RpcCode::OutOfRange,
                    format!("range [{}, {}] beyond tip {}", start, end, self.tip_height),
                ))
                .await;
            tx.end().await;
            return;
        }

        let copies = if self.duplicate { 2 } else { 1 };
        let mut sent = 0usize;
        for height in self.delivery_order(start, end) {
            for _ in 0..copies {
                if fail_after == Some(sent) {
                    let _ = tx.status(self.failure.clone()).await;
                    tx.end().await;
                    return;
                }
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.data(mock_block(height)).await.is_err() {
                    return;
                }
                sent += 1;
            }
        }
        if fail_after == Some(sent) {
            let _ = tx.status(self.failure.clone()).await;
        } else if !self.omit_status {
            let _ = tx.status(RpcStatus::ok()).await;
        }
        tx.end().await;
    }
}

#[async_trait]
impl CompactTxStreamer for MockCompactTxStreamer {
    async fn get_block_range(&self, range: BlockRange) -> Result<BlockStream, StreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(range.bounds());
        }
        let fail_after = self.take_failure();
        let (tx, rx) = block_stream_channel(DEFAULT_EVENT_BUFFER);
        tokio::spawn(self.clone().serve(range, tx, fail_after));
        Ok(rx)
    }

    async fn get_latest_block(&self) -> Result<BlockId, StreamError> {
        Ok(BlockId {
            height: self.tip_height,
            hash: mock_hash(self.tip_height).to_vec(),
        })
    }

    fn endpoint(&self) -> &str {
        "mock://lightwalletd"
    }
}

/// Deterministic 32-byte hash for a height.
pub fn mock_hash(height: Height) -> [u8; HASH_SIZE] {
    let mut hash = [0u8; HASH_SIZE];
    hash[..8].copy_from_slice(&height.to_le_bytes());
    hash
}

/// Synthetic block: one transaction with one Orchard action and one
/// Sapling output, widths valid.
pub fn mock_block(height: Height) -> CompactBlock {
    let tx = CompactTx {
        index: 0,
        hash: mock_hash(height).to_vec(),
        fee: 1000,
        spends: Vec::new(),
        outputs: vec![CompactSaplingOutput {
            cmu: vec![1; HASH_SIZE],
            ephemeral_key: vec![2; HASH_SIZE],
            ciphertext: vec![3; COMPACT_NOTE_SIZE],
        }],
        actions: vec![CompactOrchardAction {
            nullifier: vec![4; HASH_SIZE],
            cmx: vec![5; HASH_SIZE],
            ephemeral_key: vec![6; HASH_SIZE],
            ciphertext: vec![7; COMPACT_NOTE_SIZE],
        }],
    };
    CompactBlock {
        proto_version: 1,
        height,
        hash: mock_hash(height).to_vec(),
        prev_hash: mock_hash(height.saturating_sub(1)).to_vec(),
        time: 1_477_641_360 + (height as u32).wrapping_mul(75),
        header: Vec::new(),
        vtx: vec![tx],
    }
}

/// Consumer that records every batch.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    /// Batches received, in order.
    pub batches: Vec<TransactionBatch>,
    /// Refuse the batch with this index.
    pub fail_on_batch: Option<usize>,
}

impl CollectingConsumer {
    /// Heights spanned by each received batch.
    pub fn spans(&self) -> Vec<(Height, Height)> {
        self.batches
            .iter()
            .map(|b| (b.start_height, b.end_height))
            .collect()
    }
}

#[async_trait]
impl BlockConsumer for CollectingConsumer {
    async fn consume(&mut self, batch: TransactionBatch) -> Result<(), StreamError> {
        if self.fail_on_batch == Some(self.batches.len()) {
            return Err(StreamError::Consumer("mock consumer refused batch".to_string()));
        }
        self.batches.push(batch);
        Ok(())
    }
}
