//! Shared helpers for the protocol tests: a channel-backed sink standing in
//! for the socket, and a scripted engine.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use graphsock_api::ws::{MessageSink, SinkClosed};
use graphsock_commons::{ExecutionResult, MessageType, OperationMessage};
use graphsock_core::{ExecutionParams, GraphQLEngine, OperationOutcome};

/// What the connection wrote to the "socket".
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Frame(OperationMessage),
    Close(u16, String),
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed> {
        let frame: OperationMessage = serde_json::from_str(&text).map_err(|_| SinkClosed)?;
        self.tx.send(SinkEvent::Frame(frame)).map_err(|_| SinkClosed)
    }

    async fn close(self, code: u16, reason: String) -> Result<(), SinkClosed> {
        self.tx
            .send(SinkEvent::Close(code, reason))
            .map_err(|_| SinkClosed)
    }
}

/// Engine with canned behavior.
///
/// `execute` returns `execute_result`; `subscribe` emits `stream_results`
/// and then either ends the stream or, with `hold_open`, keeps it open
/// until the operation is cancelled.
pub struct StubEngine {
    pub execute_result: ExecutionResult,
    pub stream_results: Vec<ExecutionResult>,
    pub hold_open: bool,
    pub fail: Option<String>,
}

impl Default for StubEngine {
    fn default() -> Self {
        Self {
            execute_result: ExecutionResult::default(),
            stream_results: Vec::new(),
            hold_open: false,
            fail: None,
        }
    }
}

impl StubEngine {
    pub fn into_engine(self) -> Arc<dyn GraphQLEngine> {
        Arc::new(self)
    }
}

#[async_trait]
impl GraphQLEngine for StubEngine {
    async fn execute(&self, _params: &ExecutionParams) -> OperationOutcome {
        if let Some(reason) = &self.fail {
            return OperationOutcome::Failure(reason.clone());
        }
        OperationOutcome::Single(self.execute_result.clone())
    }

    async fn subscribe(&self, params: &ExecutionParams) -> OperationOutcome {
        if let Some(reason) = &self.fail {
            return OperationOutcome::Failure(reason.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for result in &self.stream_results {
            let _ = tx.send(result.clone());
        }

        if self.hold_open {
            let cancelled = params.cancellation.clone();
            tokio::spawn(async move {
                cancelled.cancelled().await;
                drop(tx);
            });
        }

        OperationOutcome::Stream(rx)
    }
}

/// Waits for the next sink event, failing the test after two seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> SinkEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a sink event")
        .expect("sink channel closed unexpectedly")
}

/// Asserts the connection stays quiet for a little while.
pub async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) {
    let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(quiet.is_err(), "expected silence but got {:?}", quiet);
}

/// Unwraps a frame event and checks its type and id.
pub fn expect_frame(event: SinkEvent, message_type: MessageType, id: Option<&str>) -> OperationMessage {
    match event {
        SinkEvent::Frame(frame) => {
            assert_eq!(frame.message_type, message_type, "frame: {:?}", frame);
            assert_eq!(frame.id.as_deref(), id, "frame: {:?}", frame);
            frame
        }
        SinkEvent::Close(code, reason) => {
            panic!(
                "expected a {} frame but the connection closed with {}: {}",
                message_type, code, reason
            )
        }
    }
}

/// Waits for the close event, draining any frames still in flight.
pub async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<SinkEvent>, code: u16) -> String {
    loop {
        match next_event(rx).await {
            SinkEvent::Frame(_) => continue,
            SinkEvent::Close(actual, reason) => {
                assert_eq!(actual, code, "close reason: {}", reason);
                return reason;
            }
        }
    }
}

/// Unwraps a close event and checks the code.
pub fn expect_close(event: SinkEvent, code: u16) -> String {
    match event {
        SinkEvent::Close(actual, reason) => {
            assert_eq!(actual, code, "close reason: {}", reason);
            reason
        }
        SinkEvent::Frame(frame) => panic!("expected close {} but got frame {:?}", code, frame),
    }
}
