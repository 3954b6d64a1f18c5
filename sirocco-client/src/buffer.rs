//! Offline message buffering.
//!
//! While the connection is down, outbound messages divert to a
//! [`BackupBuffer`]. On the next transition to Open the supervisor drains
//! the buffer through the normal send path, ahead of any messages sent
//! after the `Connected` event. The core only requires FIFO semantics and
//! idempotent `open`/`close`; implementations are free to persist.

use crate::message::OutMessage;
use async_trait::async_trait;
use parking_lot::Mutex;
use sirocco_core::error::ClientError;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// FIFO store for messages sent while disconnected.
#[async_trait]
pub trait BackupBuffer: Send + Sync + fmt::Debug {
    /// Signals the start of a connected span. Idempotent.
    fn open(&self);

    /// Signals the end of the session. Idempotent.
    fn close(&self);

    /// Enqueues a message. Accepted in any phase.
    fn write(&self, message: OutMessage);

    /// Emits buffered entries to `sink` in FIFO order.
    ///
    /// Resolves once the sink has accepted the last entry, returning how
    /// many entries were drained.
    async fn drain(&self, sink: &mpsc::Sender<OutMessage>) -> Result<usize, ClientError>;
}

/// In-memory [`BackupBuffer`].
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    entries: Mutex<VecDeque<OutMessage>>,
    opened: AtomicBool,
}

impl MemoryBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl BackupBuffer for MemoryBuffer {
    fn open(&self) {
        if !self.opened.swap(true, Ordering::SeqCst) {
            debug!(pending = self.len(), "backup buffer opened");
        }
    }

    fn close(&self) {
        if self.opened.swap(false, Ordering::SeqCst) {
            debug!(pending = self.len(), "backup buffer closed");
        }
    }

    fn write(&self, message: OutMessage) {
        self.entries.lock().push_back(message);
    }

    async fn drain(&self, sink: &mpsc::Sender<OutMessage>) -> Result<usize, ClientError> {
        let mut drained = 0usize;
        loop {
            // Pop under the lock, send outside it.
            let next = self.entries.lock().pop_front();
            let Some(message) = next else { break };
            sink.send(message)
                .await
                .map_err(|_| ClientError::closed("drain sink dropped"))?;
            drained += 1;
        }
        Ok(drained)
    }
}
