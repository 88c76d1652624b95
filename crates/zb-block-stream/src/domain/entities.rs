//! # Domain Entities
//!
//! Wire records of the `cash.z.wallet.sdk.rpc` compact block protocol.
//!
//! Declared with `prost` derives instead of build-time generation, so
//! the crate builds without `protoc`. Field tags follow the upstream
//! `service.proto` / `compact_formats.proto` schema.

#![allow(missing_docs)] // Proto fields don't need individual docs

use prost::Message;

use super::errors::{Height, StreamError};
use super::invariants::{COMPACT_NOTE_SIZE, HASH_SIZE};

/// Fully qualified gRPC service name.
pub const SERVICE_NAME: &str = "cash.z.wallet.sdk.rpc.CompactTxStreamer";

/// Block identifier. The hash is optional on requests.
#[derive(Clone, PartialEq, Eq, Hash, Message)]
pub struct BlockId {
    #[prost(uint64, tag = "1")]
    pub height: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

impl BlockId {
    /// Identifier addressing a height only.
    pub fn at(height: Height) -> Self {
        Self {
            height,
            hash: Vec::new(),
        }
    }
}

/// Inclusive block range request.
#[derive(Clone, PartialEq, Message)]
pub struct BlockRange {
    #[prost(message, optional, tag = "1")]
    pub start: Option<BlockId>,
    #[prost(message, optional, tag = "2")]
    pub end: Option<BlockId>,
}

impl BlockRange {
    /// Start height (0 when the field is absent, as proto3 decodes it).
    pub fn start_height(&self) -> Height {
        self.start.as_ref().map(|b| b.height).unwrap_or_default()
    }

    /// End height (0 when the field is absent).
    pub fn end_height(&self) -> Height {
        self.end.as_ref().map(|b| b.height).unwrap_or_default()
    }

    /// `(start, end)` heights.
    pub fn bounds(&self) -> (Height, Height) {
        (self.start_height(), self.end_height())
    }

    /// Whether `start <= end`.
    pub fn is_ascending(&self) -> bool {
        self.start_height() <= self.end_height()
    }

    /// Number of heights covered; 0 for a descending range. Saturates at
    /// `u64::MAX` for `[0, u64::MAX]`, which covers one more.
    pub fn len(&self) -> u64 {
        let (start, end) = self.bounds();
        if start > end {
            0
        } else {
            (end - start).saturating_add(1)
        }
    }

    /// True when the range covers no heights.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `height` lies inside an ascending range.
    pub fn contains(&self, height: Height) -> bool {
        let (start, end) = self.bounds();
        start <= height && height <= end
    }
}

/// Chain selector for `GetLatestBlock`.
#[derive(Clone, PartialEq, Message)]
pub struct ChainSpec {}

/// Reduced block carrying what client-side scanning needs.
#[derive(Clone, PartialEq, Message)]
pub struct CompactBlock {
    #[prost(uint32, tag = "1")]
    pub proto_version: u32,
    #[prost(uint64, tag = "2")]
    pub height: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub prev_hash: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub time: u32,
    #[prost(bytes = "vec", tag = "6")]
    pub header: Vec<u8>,
    #[prost(message, repeated, tag = "7")]
    pub vtx: Vec<CompactTx>,
}

impl CompactBlock {
    /// Block with no transactions, for tests and demos.
    pub fn empty(height: Height) -> Self {
        Self {
            height,
            ..Default::default()
        }
    }

    /// Check every contained record's field widths.
    pub fn validate(&self) -> Result<(), StreamError> {
        self.vtx.iter().try_for_each(CompactTx::validate)
    }
}

/// Compact transaction: shielded components only.
#[derive(Clone, PartialEq, Message)]
pub struct CompactTx {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub fee: u32,
    #[prost(message, repeated, tag = "4")]
    pub spends: Vec<CompactSaplingSpend>,
    #[prost(message, repeated, tag = "5")]
    pub outputs: Vec<CompactSaplingOutput>,
    #[prost(message, repeated, tag = "6")]
    pub actions: Vec<CompactOrchardAction>,
}

impl CompactTx {
    /// Check the transaction hash and every shielded component.
    pub fn validate(&self) -> Result<(), StreamError> {
        check_len("tx.hash", &self.hash, HASH_SIZE)?;
        self.spends.iter().try_for_each(CompactSaplingSpend::validate)?;
        self.outputs.iter().try_for_each(CompactSaplingOutput::validate)?;
        self.actions.iter().try_for_each(CompactOrchardAction::validate)
    }
}

/// Sapling spend (nullifier only).
#[derive(Clone, PartialEq, Message)]
pub struct CompactSaplingSpend {
    #[prost(bytes = "vec", tag = "1")]
    pub nf: Vec<u8>,
}

impl CompactSaplingSpend {
    pub fn validate(&self) -> Result<(), StreamError> {
        check_len("spend.nf", &self.nf, HASH_SIZE)
    }
}

/// Sapling output: commitment, ephemeral key, first 52 ciphertext bytes.
#[derive(Clone, PartialEq, Message)]
pub struct CompactSaplingOutput {
    #[prost(bytes = "vec", tag = "1")]
    pub cmu: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub ephemeral_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub ciphertext: Vec<u8>,
}

impl CompactSaplingOutput {
    pub fn validate(&self) -> Result<(), StreamError> {
        check_len("output.cmu", &self.cmu, HASH_SIZE)?;
        check_len("output.ephemeral_key", &self.ephemeral_key, HASH_SIZE)?;
        check_len("output.ciphertext", &self.ciphertext, COMPACT_NOTE_SIZE)
    }
}

/// Orchard action: nullifier, commitment, ephemeral key, compact ciphertext.
#[derive(Clone, PartialEq, Message)]
pub struct CompactOrchardAction {
    #[prost(bytes = "vec", tag = "1")]
    pub nullifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub cmx: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub ephemeral_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub ciphertext: Vec<u8>,
}

impl CompactOrchardAction {
    pub fn validate(&self) -> Result<(), StreamError> {
        check_len("action.nullifier", &self.nullifier, HASH_SIZE)?;
        check_len("action.cmx", &self.cmx, HASH_SIZE)?;
        check_len("action.ephemeral_key", &self.ephemeral_key, HASH_SIZE)?;
        check_len("action.ciphertext", &self.ciphertext, COMPACT_NOTE_SIZE)
    }
}

fn check_len(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), StreamError> {
    if bytes.len() != expected {
        return Err(StreamError::InvalidField {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}
