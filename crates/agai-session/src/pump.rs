//! Bounded, non-blocking channel carrying LRU updates off the request path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// What a queued update asks the LRU tracker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LruOp {
    /// The session was read or re-stored; make it most recently used.
    Move,
    /// A new session was stored; start tracking it.
    Insert,
    /// The session left the registry; stop tracking it.
    Remove,
}

/// A single queued LRU update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruEvent {
    pub session_id: String,
    pub op: LruOp,
}

/// Message actually carried by the channel.
#[derive(Debug)]
pub(crate) enum PumpMessage {
    Update(LruEvent),
    /// Barrier: acknowledged once every earlier message has been applied.
    Flush(oneshot::Sender<()>),
}

/// Producer side of the update channel.
///
/// Sends never block. When the queue is full the event is dropped and
/// counted; LRU precision is given up before request latency.
#[derive(Debug, Clone)]
pub(crate) struct UpdatePump {
    tx: mpsc::Sender<PumpMessage>,
    dropped: Arc<AtomicU64>,
}

impl UpdatePump {
    /// Create the pump and the receiver for its consumer task.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<PumpMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pump = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (pump, rx)
    }

    /// Queue an update without waiting. Returns `false` if it was dropped.
    pub(crate) fn try_send(&self, session_id: &str, op: LruOp) -> bool {
        let event = LruEvent {
            session_id: session_id.to_string(),
            op,
        };
        match self.tx.try_send(PumpMessage::Update(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(session_id = %session_id, ?op, "LRU update channel full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Wait until every update queued before this call has been applied.
    ///
    /// Unlike [`UpdatePump::try_send`] this waits for queue space.
    pub(crate) async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PumpMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Number of updates dropped because the queue was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (pump, mut rx) = UpdatePump::channel(2);

        assert!(pump.try_send("a", LruOp::Insert));
        assert!(pump.try_send("b", LruOp::Insert));
        assert!(!pump.try_send("c", LruOp::Insert));
        assert_eq!(pump.dropped(), 1);

        match rx.recv().await {
            Some(PumpMessage::Update(event)) => {
                assert_eq!(event.session_id, "a");
                assert_eq!(event.op, LruOp::Insert);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_after_consumer_gone_is_not_counted() {
        let (pump, rx) = UpdatePump::channel(4);
        drop(rx);

        assert!(!pump.try_send("a", LruOp::Move));
        assert_eq!(pump.dropped(), 0);
    }
}
