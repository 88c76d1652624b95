//! # Application Module
//!
//! Application services orchestrating sessions over the outbound ports.

pub mod service;

pub use service::{BlockRangeService, CancelHandle, RangeSession};
