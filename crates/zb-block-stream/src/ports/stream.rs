//! # Event Channel
//!
//! Bounded channel carrying one call's `StreamEvent`s from the transport
//! task to the session.
//!
//! Contract enforced here:
//! - at most one `Status`, always before `End`
//! - nothing after `End`
//! - a sender dropped without `end()` reads as `End`
//! - closing the receiving side (cancel or drop) is observable by the
//!   producer through `is_cancelled` / `cancelled`

use tokio::sync::mpsc;

use crate::domain::{CompactBlock, RpcStatus, StreamError, StreamEvent};

/// Default event buffer per call.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Create a connected sender/stream pair.
pub fn block_stream_channel(buffer: usize) -> (StreamSender, BlockStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        StreamSender {
            tx,
            status_sent: false,
        },
        BlockStream {
            rx,
            finished: false,
        },
    )
}

/// Receiving half, owned by the session.
#[derive(Debug)]
pub struct BlockStream {
    rx: mpsc::Receiver<StreamEvent>,
    finished: bool,
}

impl BlockStream {
    /// Next event. Yields `End` exactly once, then `None`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamEvent::End) | None => {
                self.finished = true;
                self.rx.close();
                Some(StreamEvent::End)
            }
            event => event,
        }
    }

    /// Abort the call. Buffered events are discarded and the producer
    /// observes the closure.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.rx.close();
    }

    /// Whether no further events will be yielded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Producing half, owned by the transport task.
#[derive(Debug)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamEvent>,
    status_sent: bool,
}

impl StreamSender {
    /// Deliver one block. Fails with `Cancelled` once the receiver is gone.
    pub async fn data(&mut self, block: CompactBlock) -> Result<(), StreamError> {
        if self.status_sent {
            tracing::warn!(height = block.height, "[zb-stream] data after status dropped");
            return Ok(());
        }
        self.tx
            .send(StreamEvent::Data(block))
            .await
            .map_err(|_| StreamError::Cancelled)
    }

    /// Deliver the terminal status. Later statuses are ignored.
    pub async fn status(&mut self, status: RpcStatus) -> Result<(), StreamError> {
        if self.status_sent {
            tracing::warn!(status = %status, "[zb-stream] second status dropped");
            return Ok(());
        }
        self.status_sent = true;
        self.tx
            .send(StreamEvent::Status(status))
            .await
            .map_err(|_| StreamError::Cancelled)
    }

    /// Terminate the stream.
    pub async fn end(self) {
        let _ = self.tx.send(StreamEvent::End).await;
    }

    /// Whether a status was already delivered.
    pub fn status_sent(&self) -> bool {
        self.status_sent
    }

    /// Whether the receiving side cancelled or went away.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side cancels or goes away.
    pub async fn cancelled(&self) {
        self.tx.closed().await
    }
}
