//! # Algorithms
//!
//! Pure, synchronous building blocks: range construction, gRPC-Web
//! framing, per-session block assembly and result merging.

pub mod assembler;
pub mod grpc_web;
pub mod merge;
pub mod range_codec;

pub use assembler::{BlockAssembler, BlockStore, ProgressCounter};
pub use grpc_web::{
    decode_message, encode_frame, encode_request, encode_trailers, parse_trailers,
    status_from_headers, status_from_http, Frame, FrameDecoder, WireFormat, FRAME_HEADER_LEN,
};
pub use merge::{flatten_transactions, merge_completed, merge_into};
pub use range_codec::{
    build_block_range, build_block_range_checked, chunk_range, split_range, RangeChunks,
    RangeValidation,
};
