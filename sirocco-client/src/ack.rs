//! Acknowledgement registry.
//!
//! Outbound messages wrapped in [`OutMessage::Ackable`] are assigned a
//! per-connection id and tracked here until the peer echoes the id in an
//! `Ack` envelope or the caller-supplied timeout fires. On timeout the
//! send completion resolves `Cancelled` and an
//! [`InMessage::AckFailed`] carrying the original payload is pushed into
//! the receive stream.

use crate::message::{InMessage, OutMessage};
use parking_lot::Mutex;
use sirocco_core::completion::Completion;
use sirocco_core::error::ClientError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Caller-side completion of an ack-wrapped send.
pub(crate) type SendReply = oneshot::Sender<Result<Completion, ClientError>>;

struct Pending {
    inner: OutMessage,
    timeout: Duration,
    reply: Option<SendReply>,
    cancel: Option<oneshot::Sender<()>>,
}

/// Tracks ack-required sends and their timeout timers.
///
/// Ids are monotonically increasing and valid for one connection; the
/// registry is cleared when the connection closes.
#[derive(Debug)]
pub(crate) struct AckRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    events: mpsc::Sender<InMessage>,
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("inner", &self.inner)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AckRegistry {
    pub fn new(events: mpsc::Sender<InMessage>) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Registers an ack-required message and arms its timeout timer.
    ///
    /// Returns the id the matching `Ack` must echo. `reply`, when
    /// present, resolves `Success` on ack and `Cancelled` on timeout.
    pub fn register(
        self: &Arc<Self>,
        inner: OutMessage,
        timeout: Duration,
        reply: Option<SendReply>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.pending.lock().insert(
            id,
            Pending {
                inner,
                timeout,
                reply,
                cancel: Some(cancel_tx),
            },
        );

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_rx => {}
                () = tokio::time::sleep(timeout) => registry.expire(id).await,
            }
        });

        id
    }

    /// Resolves the entry for an inbound `Ack`.
    ///
    /// Unknown or duplicate ids are ignored.
    pub fn acknowledge(&self, id: u64) {
        let Some(mut entry) = self.pending.lock().remove(&id) else {
            trace!(id, "ignoring unknown or duplicate ack");
            return;
        };
        if let Some(cancel) = entry.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(Ok(Completion::Success));
        }
        debug!(id, "ack received");
    }

    /// Withdraws an entry whose request never made it to the wire,
    /// returning the caller completion so the send can fail properly.
    pub fn abort(&self, id: u64) -> Option<SendReply> {
        let mut entry = self.pending.lock().remove(&id)?;
        if let Some(cancel) = entry.cancel.take() {
            let _ = cancel.send(());
        }
        entry.reply.take()
    }

    /// Timer fired: fail the entry and surface `AckFailed`.
    async fn expire(&self, id: u64) {
        let Some(mut entry) = self.pending.lock().remove(&id) else {
            return;
        };
        warn!(
            error = %ClientError::AckTimeout {
                id,
                timeout_ms: entry.timeout.as_millis() as u64,
            },
            "ack timer fired"
        );
        if let Some(reply) = entry.reply.take() {
            let _ = reply.send(Ok(Completion::Cancelled));
        }
        let _ = self
            .events
            .send(InMessage::AckFailed(Box::new(entry.inner)))
            .await;
    }

    /// Fails every pending entry and resets the id sequence.
    ///
    /// Called on entry to Closed: ids are per-connection, so nothing
    /// outstanding can be acknowledged any more.
    pub async fn clear(&self) {
        let drained: Vec<(u64, Pending)> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "clearing pending acks");
        }
        for (_, mut entry) in drained {
            if let Some(cancel) = entry.cancel.take() {
                let _ = cancel.send(());
            }
            if let Some(reply) = entry.reply.take() {
                let _ = reply.send(Ok(Completion::Cancelled));
            }
            let _ = self
                .events
                .send(InMessage::AckFailed(Box::new(entry.inner)))
                .await;
        }
        self.next_id.store(0, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
