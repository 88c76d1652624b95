//! # Domain Invariants
//!
//! Rules every completed session output must satisfy.

use super::entities::CompactBlock;
use super::errors::{Height, StreamError};

/// Width of hashes, nullifiers, commitments and ephemeral keys.
pub const HASH_SIZE: usize = 32;

/// Compact note ciphertext length (first 52 bytes of the full ciphertext).
pub const COMPACT_NOTE_SIZE: usize = 52;

/// Blocks per sync batch (the original harness chunked streams by 250).
pub const DEFAULT_BLOCK_BATCH_SIZE: u64 = 250;

/// Default bound on a single gRPC-Web message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Invariant: a range must not run backwards.
pub fn invariant_range_ordered(start: Height, end: Height) -> Result<(), StreamError> {
    if start > end {
        return Err(StreamError::InvalidRange { start, end });
    }
    Ok(())
}

/// Invariant: output heights strictly ascend (sorted, no duplicates).
pub fn invariant_strictly_ascending(blocks: &[CompactBlock]) -> bool {
    blocks.windows(2).all(|w| w[0].height < w[1].height)
}

/// Invariant: every height of `[start, end]` is present exactly once.
pub fn invariant_full_coverage(blocks: &[CompactBlock], start: Height, end: Height) -> bool {
    if start > end {
        return blocks.is_empty();
    }
    // Compare spans rather than counts; `[0, u64::MAX]` has no u64 count.
    !blocks.is_empty()
        && (blocks.len() - 1) as u64 == end - start
        && invariant_strictly_ascending(blocks)
        && blocks.first().map(|b| b.height) == Some(start)
        && blocks.last().map(|b| b.height) == Some(end)
}
