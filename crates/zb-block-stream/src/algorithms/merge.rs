//! # Merge and Flatten
//!
//! Combines the completed results of independent sessions and flattens
//! blocks into the transaction sequence downstream scanners consume.

use crate::algorithms::BlockStore;
use crate::domain::{CompactBlock, TransactionBatch};

/// Fold `blocks` into `store`. Last write wins per height.
pub fn merge_into(store: &mut BlockStore, blocks: impl IntoIterator<Item = CompactBlock>) {
    for block in blocks {
        store.insert(block.height, block);
    }
}

/// Union of several completed results, sorted by height.
///
/// Shards cover disjoint heights in normal operation; the merge is still
/// idempotent and order-independent when they overlap.
pub fn merge_completed<I>(results: I) -> Vec<CompactBlock>
where
    I: IntoIterator<Item = Vec<CompactBlock>>,
{
    let mut store = BlockStore::new();
    for blocks in results {
        merge_into(&mut store, blocks);
    }
    store.into_values().collect()
}

/// Flatten ascending blocks into their transactions, block order first,
/// then intra-block order.
pub fn flatten_transactions(blocks: &[CompactBlock]) -> TransactionBatch {
    debug_assert!(crate::domain::invariant_strictly_ascending(blocks));

    let transactions = blocks
        .iter()
        .flat_map(|block| block.vtx.iter().cloned())
        .collect();

    TransactionBatch {
        start_height: blocks.first().map(|b| b.height).unwrap_or_default(),
        end_height: blocks.last().map(|b| b.height).unwrap_or_default(),
        block_count: blocks.len(),
        transactions,
    }
}
