//! # Domain Errors
//!
//! Error taxonomy for block range streaming, plus the gRPC status codes
//! that travel in `status` events.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Block height.
pub type Height = u64;

/// gRPC status code carried by a stream `status` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCode {
    /// Not an error.
    Ok,
    /// The operation was cancelled.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// Client specified an invalid argument.
    InvalidArgument,
    /// Deadline expired before the operation could complete.
    DeadlineExceeded,
    /// Requested entity was not found.
    NotFound,
    /// Entity already exists.
    AlreadyExists,
    /// Caller lacks permission.
    PermissionDenied,
    /// Some resource has been exhausted.
    ResourceExhausted,
    /// System is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// Operation was attempted past the valid range.
    OutOfRange,
    /// Operation is not implemented by the server.
    Unimplemented,
    /// Internal error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// Missing or invalid authentication credentials.
    Unauthenticated,
}

impl RpcCode {
    /// Map a numeric gRPC status. Unrecognised values become `Unknown`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            2 => Self::Unknown,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    /// Numeric value on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Cancelled => 1,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::PermissionDenied => 7,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
            Self::Unauthenticated => 16,
        }
    }

    /// Whether this code means success.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Codes produced by the connection rather than by the node's
    /// judgement of the request.
    pub fn is_transport(self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::Unknown
                | Self::Internal
                | Self::DataLoss
                | Self::ResourceExhausted
                | Self::Aborted
        )
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        f.write_str(name)
    }
}

/// Block stream error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Range start lies above range end. Raised before any RPC is issued.
    #[error("Invalid block range: start {start} > end {end}")]
    InvalidRange {
        /// Requested start height
        start: Height,
        /// Requested end height
        end: Height,
    },

    /// Connection-level failure (reset, proxy unavailable, corrupt stream).
    #[error("Transport error ({code}): {details}")]
    Transport {
        /// Terminal status code
        code: RpcCode,
        /// Status details
        details: String,
    },

    /// The node rejected the request (height beyond tip, not synced, ...).
    #[error("Server rejected request ({code}): {details}")]
    Server {
        /// Terminal status code
        code: RpcCode,
        /// Status details
        details: String,
    },

    /// Session deadline expired.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Caller aborted the session.
    #[error("Stream cancelled")]
    Cancelled,

    /// Stream ended before every height of the range arrived.
    #[error("Stream ended early: received {received} of {expected} blocks")]
    PartialStream {
        /// Heights the range covers
        expected: u64,
        /// Distinct heights received
        received: u64,
    },

    /// A message could not be decoded off the wire.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A compact record field has the wrong width.
    #[error("Invalid field {field}: expected {expected} bytes, got {actual}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Required length
        expected: usize,
        /// Observed length
        actual: usize,
    },

    /// Endpoint or client construction failure.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The downstream consumer refused a batch.
    #[error("Consumer error: {0}")]
    Consumer(String),
}

impl StreamError {
    /// Build the failure matching a non-success terminal status.
    pub fn from_status(code: RpcCode, details: impl Into<String>) -> Self {
        let details = details.into();
        match code {
            RpcCode::DeadlineExceeded => Self::DeadlineExceeded,
            RpcCode::Cancelled => Self::Cancelled,
            c if c.is_transport() => Self::Transport { code: c, details },
            c => Self::Server { code: c, details },
        }
    }

    /// Status code this error corresponds to, if any.
    pub fn code(&self) -> Option<RpcCode> {
        match self {
            Self::Transport { code, .. } | Self::Server { code, .. } => Some(*code),
            Self::DeadlineExceeded => Some(RpcCode::DeadlineExceeded),
            Self::Cancelled => Some(RpcCode::Cancelled),
            _ => None,
        }
    }

    /// Whether re-issuing the request with a narrowed range may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::DeadlineExceeded | Self::PartialStream { .. }
        )
    }

    /// True when the stream delivered nothing usable.
    pub fn is_empty_stream(&self) -> bool {
        matches!(self, Self::PartialStream { received: 0, .. })
    }
}
