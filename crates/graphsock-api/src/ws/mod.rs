//! WebSocket connection machinery shared by both subprotocols.
//!
//! Each connection owns a single outgoing frame queue with exactly one
//! consumer, the write loop. Producers (message handlers, forwarders, the
//! keep-alive ticker) enqueue through [`Outgoing`], which refuses frames
//! once the close routine has run.

mod outgoing;
mod sink;

pub mod graphql_ws;
pub mod transport_ws;

pub use outgoing::Outgoing;
pub use sink::{ActixSink, MessageSink, SinkClosed};

use graphsock_commons::close::WRITE_TIMEOUT;
use graphsock_commons::OperationMessage;
use log::warn;
use tokio::sync::mpsc;

/// Runs the write loop: drains the outgoing queue into the sink, applying
/// the write timeout to every frame.
///
/// Returns `true` when the loop ended because of a write failure or
/// timeout, in which case the socket is corrupt and the caller must tear
/// the connection down without sending further frames.
pub(crate) async fn write_loop<S: MessageSink>(
    mut rx: mpsc::UnboundedReceiver<OperationMessage>,
    mut sink: S,
    connection_id: String,
) -> bool {
    while let Some(msg) = rx.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send_text(msg.to_json())).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!("[{}] sending message failed", connection_id);
                return true;
            }
            Err(_) => {
                warn!("[{}] write timed out, closing write loop", connection_id);
                return true;
            }
        }
    }
    // queue closed by the close routine
    false
}
