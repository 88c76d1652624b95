//! # Value Objects
//!
//! Stream events, terminal outcomes and the batch shape handed to
//! downstream consumers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::entities::{
    CompactBlock, CompactOrchardAction, CompactSaplingOutput, CompactSaplingSpend, CompactTx,
};
use super::errors::{Height, RpcCode, StreamError};

/// Response metadata (headers and trailers other than the status pair).
pub type Metadata = BTreeMap<String, String>;

/// Transport/application result of one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcStatus {
    /// Status code.
    pub code: RpcCode,
    /// Human readable details (`grpc-message`).
    pub details: String,
    /// Remaining metadata.
    pub metadata: Metadata,
}

impl RpcStatus {
    /// Status with no metadata.
    pub fn new(code: RpcCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
            metadata: Metadata::new(),
        }
    }

    /// Successful status.
    pub fn ok() -> Self {
        Self::new(RpcCode::Ok, "")
    }

    /// Whether the status reports success.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Convert a failure status into its error; `None` for success.
    pub fn to_error(&self) -> Option<StreamError> {
        if self.is_ok() {
            None
        } else {
            Some(StreamError::from_status(self.code, self.details.clone()))
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.details)
        }
    }
}

/// One event of a server-streaming call, in delivery order.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A decoded block.
    Data(CompactBlock),
    /// Terminal status; precedes `End` when present.
    Status(RpcStatus),
    /// Stream termination. Nothing follows.
    End,
}

/// Terminal result of one streaming session.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// All heights arrived and the stream closed cleanly.
    Completed(Vec<CompactBlock>),
    /// The session failed; no blocks are exposed.
    Failed(StreamError),
}

impl StreamOutcome {
    /// Whether the session completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Blocks of a completed session.
    pub fn blocks(&self) -> Option<&[CompactBlock]> {
        match self {
            Self::Completed(blocks) => Some(blocks),
            Self::Failed(_) => None,
        }
    }

    /// Failure of a failed session.
    pub fn error(&self) -> Option<&StreamError> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(e) => Some(e),
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> Result<Vec<CompactBlock>, StreamError> {
        match self {
            Self::Completed(blocks) => Ok(blocks),
            Self::Failed(e) => Err(e),
        }
    }

    /// Label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(StreamError::Cancelled) => "cancelled",
            Self::Failed(StreamError::DeadlineExceeded) => "deadline_exceeded",
            Self::Failed(StreamError::PartialStream { .. }) => "partial",
            Self::Failed(StreamError::Server { .. }) => "server_error",
            Self::Failed(_) => "transport_error",
        }
    }
}

/// Shielded pools a consumer may scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShieldedPool {
    /// Sapling outputs only.
    Sapling,
    /// Orchard actions only.
    Orchard,
    /// Both pools.
    Both,
}

impl ShieldedPool {
    /// Whether Sapling outputs are scanned.
    pub fn sync_sapling(&self) -> bool {
        matches!(self, Self::Sapling | Self::Both)
    }

    /// Whether Orchard actions are scanned.
    pub fn sync_orchard(&self) -> bool {
        matches!(self, Self::Orchard | Self::Both)
    }
}

impl FromStr for ShieldedPool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sapling" => Ok(Self::Sapling),
            "orchard" => Ok(Self::Orchard),
            "both" => Ok(Self::Both),
            _ => Err(format!("Invalid pool: {}", s)),
        }
    }
}

/// Network the node serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Zcash mainnet.
    Mainnet,
    /// Zcash testnet.
    Testnet,
}

impl Network {
    /// First height at which `pool` can carry notes. For `Both` this is
    /// the Sapling activation, the earlier of the two.
    pub fn activation_height(&self, pool: ShieldedPool) -> Height {
        match (self, pool) {
            (Self::Mainnet, ShieldedPool::Orchard) => 1_687_104,
            (Self::Mainnet, _) => 419_200,
            (Self::Testnet, ShieldedPool::Orchard) => 1_842_420,
            (Self::Testnet, _) => 280_000,
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            _ => Err(format!("Invalid network: {}", s)),
        }
    }
}

/// Height-ordered transactions of a completed range, ready for batch
/// trial decryption or commitment tree insertion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionBatch {
    /// Lowest block height in the batch.
    pub start_height: Height,
    /// Highest block height in the batch.
    pub end_height: Height,
    /// Number of blocks flattened.
    pub block_count: usize,
    /// Transactions in block order, then intra-block order.
    pub transactions: Vec<CompactTx>,
}

impl TransactionBatch {
    /// Whether the batch carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Orchard actions in batch order.
    pub fn orchard_actions(&self) -> impl Iterator<Item = &CompactOrchardAction> {
        self.transactions.iter().flat_map(|tx| tx.actions.iter())
    }

    /// Sapling outputs in batch order.
    pub fn sapling_outputs(&self) -> impl Iterator<Item = &CompactSaplingOutput> {
        self.transactions.iter().flat_map(|tx| tx.outputs.iter())
    }

    /// Sapling spends in batch order.
    pub fn sapling_spends(&self) -> impl Iterator<Item = &CompactSaplingSpend> {
        self.transactions.iter().flat_map(|tx| tx.spends.iter())
    }

    /// Notes a consumer scanning `pool` would trial-decrypt.
    pub fn note_count(&self, pool: ShieldedPool) -> usize {
        let mut count = 0;
        if pool.sync_orchard() {
            count += self.orchard_actions().count();
        }
        if pool.sync_sapling() {
            count += self.sapling_outputs().count();
        }
        count
    }
}

/// Summary of a batched sync run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Blocks handed to the consumer.
    pub blocks_processed: u64,
    /// Transactions handed to the consumer.
    pub transactions_processed: u64,
    /// Orchard actions handed to the consumer.
    pub actions_processed: u64,
    /// Sapling outputs handed to the consumer.
    pub outputs_processed: u64,
    /// Batches delivered.
    pub batches: u64,
    /// Streams re-opened after a retryable failure.
    pub retries: u64,
    /// Highest height consumed, if any.
    pub last_height: Option<Height>,
    /// Wall clock duration.
    pub elapsed_ms: u64,
}
