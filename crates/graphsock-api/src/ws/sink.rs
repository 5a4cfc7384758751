//! The socket write seam.
//!
//! The write loop and the close routine are the only writers to the
//! WebSocket. They go through [`MessageSink`] so the protocol machines can
//! be driven against a channel-backed sink in tests.

use actix_ws::{CloseCode, CloseReason, Session};
use async_trait::async_trait;
use thiserror::Error;

/// The peer is gone or the session was already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("websocket session closed")]
pub struct SinkClosed;

/// Outbound half of a WebSocket connection.
#[async_trait]
pub trait MessageSink: Clone + Send + Sync + 'static {
    /// Writes one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed>;

    /// Writes the close control frame with the given code and reason.
    async fn close(self, code: u16, reason: String) -> Result<(), SinkClosed>;
}

/// Production sink backed by an actix-ws session.
#[derive(Clone)]
pub struct ActixSink {
    session: Session,
}

impl ActixSink {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl MessageSink for ActixSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed> {
        self.session.text(text).await.map_err(|_| SinkClosed)
    }

    async fn close(self, code: u16, reason: String) -> Result<(), SinkClosed> {
        let reason = CloseReason {
            code: to_close_code(code),
            description: Some(reason),
        };
        self.session.close(Some(reason)).await.map_err(|_| SinkClosed)
    }
}

fn to_close_code(code: u16) -> CloseCode {
    match code {
        1000 => CloseCode::Normal,
        1001 => CloseCode::Away,
        1002 => CloseCode::Protocol,
        1008 => CloseCode::Policy,
        1011 => CloseCode::Error,
        other => CloseCode::Other(other),
    }
}
