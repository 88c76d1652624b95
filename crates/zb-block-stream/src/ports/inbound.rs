//! # Inbound Ports
//!
//! API trait defining what the block range client can do.

use async_trait::async_trait;

use super::outbound::BlockConsumer;
use crate::domain::{Height, StreamError, StreamOutcome, SyncReport};

/// Block range API - inbound port.
#[async_trait]
pub trait BlockRangeApi: Send + Sync {
    /// Fetch `[start, end]` over one stream.
    async fn fetch_range(&self, start: Height, end: Height) -> StreamOutcome;

    /// Fetch `[start, end]` over `shards` concurrent streams and merge.
    /// Fails if any shard fails.
    async fn fetch_sharded(&self, start: Height, end: Height, shards: usize) -> StreamOutcome;

    /// Height of the node's chain tip.
    async fn latest_height(&self) -> Result<Height, StreamError>;

    /// Stream `[start, end]` in batches, handing each completed batch's
    /// transactions to `consumer` in height order.
    async fn sync_range(
        &self,
        start: Height,
        end: Height,
        consumer: &mut dyn BlockConsumer,
    ) -> Result<SyncReport, StreamError>;
}
