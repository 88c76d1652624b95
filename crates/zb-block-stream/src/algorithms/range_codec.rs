//! # Range Codec
//!
//! Builds `BlockRange` requests and splits ranges for sharded or
//! batched fetching.

use serde::{Deserialize, Serialize};

use crate::domain::{invariant_range_ordered, BlockId, BlockRange, Height, StreamError};

/// How range construction treats `start > end`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeValidation {
    /// Reject descending ranges with `InvalidRange`.
    #[default]
    Strict,
    /// Build whatever was asked for; the server decides.
    Permissive,
}

/// Build a range request. Ordering is not checked.
pub fn build_block_range(start: Height, end: Height) -> BlockRange {
    BlockRange {
        start: Some(BlockId::at(start)),
        end: Some(BlockId::at(end)),
    }
}

/// Build a range request, failing fast on a descending range in
/// `Strict` mode.
pub fn build_block_range_checked(
    start: Height,
    end: Height,
    validation: RangeValidation,
) -> Result<BlockRange, StreamError> {
    if validation == RangeValidation::Strict {
        invariant_range_ordered(start, end)?;
    }
    Ok(build_block_range(start, end))
}

/// Split an ascending range into at most `shards` contiguous,
/// non-overlapping sub-ranges that cover it exactly.
///
/// Earlier shards take the remainder, so sizes differ by at most one.
/// Heights span the whole `u64` domain, so the count is kept in `u128`:
/// `[0, u64::MAX]` holds one more height than `u64` can count.
pub fn split_range(range: &BlockRange, shards: usize) -> Result<Vec<BlockRange>, StreamError> {
    let (start, end) = range.bounds();
    invariant_range_ordered(start, end)?;

    let total = u128::from(end - start) + 1;
    let shards = (shards.max(1) as u128).min(total);
    let base = total / shards;
    let remainder = total % shards;

    let mut out = Vec::with_capacity(shards as usize);
    let mut next = u128::from(start);
    for i in 0..shards {
        let len = base + u128::from(i < remainder);
        let last = next + len - 1;
        // `last <= end`, so both bounds fit in a height.
        out.push(build_block_range(next as Height, last as Height));
        next = last + 1;
    }
    Ok(out)
}

/// Consecutive sub-ranges of at most `chunk_len` heights.
#[derive(Clone, Debug)]
pub struct RangeChunks {
    next: Option<Height>,
    end: Height,
    chunk_len: u64,
}

impl Iterator for RangeChunks {
    type Item = BlockRange;

    fn next(&mut self) -> Option<BlockRange> {
        let start = self.next?;
        let last = start
            .saturating_add(self.chunk_len - 1)
            .min(self.end);
        self.next = if last >= self.end { None } else { Some(last + 1) };
        Some(build_block_range(start, last))
    }
}

/// Iterate an ascending range in chunks. `chunk_len == 0` is treated as 1.
pub fn chunk_range(range: &BlockRange, chunk_len: u64) -> Result<RangeChunks, StreamError> {
    let (start, end) = range.bounds();
    invariant_range_ordered(start, end)?;
    Ok(RangeChunks {
        next: Some(start),
        end,
        chunk_len: chunk_len.max(1),
    })
}
