//! # Ports Module
//!
//! Hexagonal architecture ports (inbound API, outbound dependencies) and
//! the event channel connecting a streaming call to its session.

pub mod inbound;
pub mod outbound;
pub mod stream;

pub use inbound::*;
pub use outbound::*;
pub use stream::*;
