//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound `CompactTxStreamer` port over gRPC-Web.

mod grpc_web_client;

pub use grpc_web_client::{ClientOptions, Credentials, GrpcWebClient};
