//! The per-connection outgoing frame queue.

use graphsock_commons::OperationMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Producer side of the outgoing queue.
///
/// All outbound frames funnel through one queue so writes stay strictly
/// ordered. The queue is closed exactly once, by the close routine; sends
/// after that are refused.
#[derive(Debug)]
pub struct Outgoing {
    tx: Mutex<Option<mpsc::UnboundedSender<OperationMessage>>>,
}

impl Outgoing {
    /// Creates the queue, returning the producer handle and the receiver
    /// the write loop consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OperationMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Enqueues a frame. Returns false when the connection is already
    /// closed and the frame was dropped.
    pub fn send(&self, msg: OperationMessage) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    /// Closes the queue. Idempotent; only the first call drops the sender.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}
