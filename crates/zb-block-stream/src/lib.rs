//! # ZB Block Stream
//!
//! Compact block range client for lightwalletd's `CompactTxStreamer`
//! service, spoken over gRPC-Web.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Fetch an inclusive height range as a server-streamed sequence of
//! compact blocks and turn it into exactly one outcome:
//! - `Completed` with every block of the range, sorted by height
//! - `Failed` with a classified error, exposing no partial data
//!
//! On top of single sessions: sharded concurrent fetch with an
//! order-independent merge, and batched sync that hands height-ordered
//! transactions to a downstream consumer and reconnects after transport
//! failures.
//!
//! ## Session Guarantees
//!
//! | Guarantee | Mechanism |
//! |-----------|-----------|
//! | One outcome per session | `BlockAssembler` resolves once, ignores later events |
//! | Height order | `BTreeMap` store, last write wins |
//! | No partial results | store dropped on any failure |
//! | Bounded time | per-session deadline, cancel handle |
//!
//! ## Module Structure
//!
//! ```text
//! zb-block-stream/
//! ├── domain/          # Wire records, events, outcomes, errors
//! ├── algorithms/      # Range codec, gRPC-Web framing, assembler, merge
//! ├── ports/           # API trait (inbound), node + consumer traits (outbound), event channel
//! ├── adapters/        # GrpcWebClient (reqwest)
//! ├── application/     # RangeSession, BlockRangeService
//! └── config.rs        # StreamConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

// Re-exports
pub use adapters::{ClientOptions, Credentials, GrpcWebClient};
pub use algorithms::{
    build_block_range, build_block_range_checked, chunk_range, flatten_transactions,
    merge_completed, split_range, BlockAssembler, BlockStore, FrameDecoder, ProgressCounter,
    RangeValidation, WireFormat,
};
pub use application::{BlockRangeService, CancelHandle, RangeSession};
pub use config::{ConfigError, StreamConfig};
pub use domain::{
    BlockId, BlockRange, ChainSpec, CompactBlock, CompactOrchardAction, CompactSaplingOutput,
    CompactSaplingSpend, CompactTx, Height, Network, RpcCode, RpcStatus, ShieldedPool,
    StreamError, StreamEvent, StreamOutcome, SyncReport, TransactionBatch, SERVICE_NAME,
};
pub use ports::{
    block_stream_channel, BlockConsumer, BlockRangeApi, BlockStream, CollectingConsumer,
    CompactTxStreamer, MockCompactTxStreamer, MockDelivery, StreamSender,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
