//! # Block Assembler
//!
//! Buffers one session's `data` events into a height-indexed store and
//! resolves the session to exactly one `StreamOutcome`.
//!
//! ## Resolution rules
//!
//! | Observed before `End` | Outcome |
//! |-----------------------|---------|
//! | error status | `Failed(status)`, store discarded |
//! | OK or no status, every height present | `Completed(sorted blocks)` |
//! | OK or no status, heights missing | `Failed(PartialStream)` |
//! | external cancel / deadline | `Failed(Cancelled / DeadlineExceeded)` |

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::{
    invariant_full_coverage, BlockRange, CompactBlock, Height, RpcStatus, StreamError,
    StreamEvent, StreamOutcome,
};

/// Height-indexed buffer owned by one session.
pub type BlockStore = BTreeMap<Height, CompactBlock>;

/// Shared, read-only view of how many `data` events a session has seen.
#[derive(Clone, Debug, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    /// Blocks received so far, duplicates included.
    pub fn blocks_processed(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Assembles one streaming session.
#[derive(Debug)]
pub struct BlockAssembler {
    range: BlockRange,
    store: BlockStore,
    status: Option<RpcStatus>,
    progress: ProgressCounter,
    resolved: bool,
}

impl BlockAssembler {
    /// Assembler for a fresh session over `range`.
    pub fn new(range: BlockRange) -> Self {
        Self {
            range,
            store: BlockStore::new(),
            status: None,
            progress: ProgressCounter::default(),
            resolved: false,
        }
    }

    /// Requested range.
    pub fn range(&self) -> &BlockRange {
        &self.range
    }

    /// Progress handle for instrumentation.
    pub fn progress(&self) -> ProgressCounter {
        self.progress.clone()
    }

    /// Distinct heights currently buffered.
    pub fn buffered(&self) -> usize {
        self.store.len()
    }

    /// Whether the session already produced its outcome.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Feed one event. Returns the outcome when this event resolves the
    /// session; `None` otherwise and for every event after resolution.
    pub fn on_event(&mut self, event: StreamEvent) -> Option<StreamOutcome> {
        if self.resolved {
            tracing::trace!("[zb-stream] event after resolution ignored");
            return None;
        }
        match event {
            StreamEvent::Data(block) => {
                let seen = self.progress.increment();
                if self.store.insert(block.height, block).is_some() {
                    tracing::debug!("[zb-stream] duplicate block replaced");
                }
                if seen % 2000 == 0 {
                    tracing::info!(blocks = seen, "[zb-stream] blocks downloaded");
                }
                None
            }
            StreamEvent::Status(status) => {
                tracing::debug!(status = %status, "[zb-stream] stream status");
                // First status wins; the channel contract allows only one.
                self.status.get_or_insert(status);
                None
            }
            StreamEvent::End => Some(self.finish()),
        }
    }

    /// Resolve as failed for a reason observed outside the event stream
    /// (cancellation, deadline). No-op returning `None` if already resolved.
    pub fn fail(&mut self, error: StreamError) -> Option<StreamOutcome> {
        if self.resolved {
            return None;
        }
        self.resolved = true;
        self.store.clear();
        Some(StreamOutcome::Failed(error))
    }

    fn finish(&mut self) -> StreamOutcome {
        if let Some(error) = self.status.as_ref().and_then(RpcStatus::to_error) {
            return self.fail(error).unwrap_or(StreamOutcome::Failed(StreamError::Cancelled));
        }

        let (start, end) = self.range.bounds();
        if self.range.is_ascending() {
            let expected = self.range.len();
            let received = self.store.range(start..=end).count() as u64;
            if received != expected {
                return self
                    .fail(StreamError::PartialStream { expected, received })
                    .unwrap_or(StreamOutcome::Failed(StreamError::Cancelled));
            }
            // Heights outside the request are not part of the answer.
            self.store.retain(|h, _| (start..=end).contains(h));
        }

        self.resolved = true;
        let store = std::mem::take(&mut self.store);
        let blocks: Vec<CompactBlock> = store.into_values().collect();
        debug_assert!(
            !self.range.is_ascending() || invariant_full_coverage(&blocks, start, end),
            "completed output must cover the requested range"
        );
        StreamOutcome::Completed(blocks)
    }
}
