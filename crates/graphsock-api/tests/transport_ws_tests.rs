//! State machine tests for the `graphql-transport-ws` connection, driven
//! through a channel-backed sink.

mod common;

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{
    expect_close, expect_frame, expect_silence, next_event, ChannelSink, SinkEvent, StubEngine,
};
use graphsock_api::options::ConnectDecision;
use graphsock_api::ws::transport_ws::TransportWsConnection;
use graphsock_api::TransportWsOptions;
use graphsock_commons::{ExecutionResult, MessageType};
use graphsock_core::Metadata;

async fn connect(
    engine: StubEngine,
    options: TransportWsOptions,
) -> (
    TransportWsConnection<ChannelSink>,
    tokio::sync::mpsc::UnboundedReceiver<common::SinkEvent>,
) {
    let (sink, rx) = ChannelSink::new();
    let conn = TransportWsConnection::connect(
        "graphql-transport-ws",
        engine.into_engine(),
        Arc::new(options),
        sink,
        None,
        Arc::new(Metadata::new()),
    )
    .await
    .expect("subprotocol should be accepted");
    (conn, rx)
}

fn long_init_timeout() -> TransportWsOptions {
    TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        ..Default::default()
    }
}

async fn init(conn: &TransportWsConnection<ChannelSink>) {
    conn.handle_text(r#"{"type":"connection_init","payload":{}}"#)
        .await;
}

#[tokio::test]
async fn test_happy_path_subscription() {
    let engine = StubEngine {
        stream_results: vec![
            ExecutionResult::from_data(json!({"t": "a"})),
            ExecutionResult::from_data(json!({"t": "b"})),
        ],
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);
    assert!(conn.scope().acknowledged());

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;

    let first = expect_frame(next_event(&mut rx).await, MessageType::Next, Some("1"));
    assert_eq!(first.payload, Some(json!({"data": {"t": "a"}})));

    let second = expect_frame(next_event(&mut rx).await, MessageType::Next, Some("1"));
    assert_eq!(second.payload, Some(json!({"data": {"t": "b"}})));

    expect_frame(next_event(&mut rx).await, MessageType::Complete, Some("1"));

    // the manager returns to empty once the stream finished
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conn.manager().subscription_count(&[]), 0);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_connection_init_timeout_closes_4408() {
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    let reason = expect_close(next_event(&mut rx).await, 4408);
    assert_eq!(reason, "connection initialisation timeout");
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_subscribe_before_ack_closes_4401() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;

    expect_close(next_event(&mut rx).await, 4401);
}

#[tokio::test]
async fn test_duplicate_subscribe_closes_4409() {
    let engine = StubEngine {
        hold_open: true,
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"a","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;
    conn.handle_text(r#"{"id":"a","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;

    let reason = expect_close(next_event(&mut rx).await, 4409);
    assert!(reason.contains("already exists"), "{}", reason);
}

#[tokio::test]
async fn test_duplicate_connection_init_closes_4429() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    init(&conn).await;
    expect_close(next_event(&mut rx).await, 4429);
}

#[tokio::test]
async fn test_ping_replies_pong_with_payload() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    conn.handle_text(r#"{"type":"ping","payload":{"t":1}}"#).await;
    let pong = expect_frame(next_event(&mut rx).await, MessageType::Pong, None);
    assert_eq!(pong.payload, Some(json!({"t": 1})));

    conn.handle_text(r#"{"type":"ping"}"#).await;
    let bare = expect_frame(next_event(&mut rx).await, MessageType::Pong, None);
    assert_eq!(bare.payload, None);
}

#[tokio::test]
async fn test_on_ping_hook_suppresses_the_pong() {
    let pings = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&pings);
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_ping: Some(Arc::new(move |_scope, _payload| {
            seen.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    conn.handle_text(r#"{"type":"ping"}"#).await;
    expect_silence(&mut rx).await;
    assert_eq!(pings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_over_subscribe_sends_next_then_complete() {
    let engine = StubEngine {
        execute_result: ExecutionResult::from_data(json!({"hello": "world"})),
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"q1","type":"subscribe","payload":{"query":"{hello}"}}"#)
        .await;

    let next = expect_frame(next_event(&mut rx).await, MessageType::Next, Some("q1"));
    assert_eq!(next.payload, Some(json!({"data": {"hello": "world"}})));
    expect_frame(next_event(&mut rx).await, MessageType::Complete, Some("q1"));
    assert_eq!(conn.manager().subscription_count(&[]), 0);
}

#[tokio::test]
async fn test_malformed_frame_closes_4400() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    conn.handle_text("not json").await;
    expect_close(next_event(&mut rx).await, 4400);
}

#[tokio::test]
async fn test_subscribe_with_empty_query_closes_4400() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":""}}"#)
        .await;
    let reason = expect_close(next_event(&mut rx).await, 4400);
    assert_eq!(reason, "query must be a non-empty string");
}

#[tokio::test]
async fn test_legacy_frame_type_closes_4400() {
    let (conn, mut rx) = connect(StubEngine::default(), long_init_timeout()).await;

    conn.handle_text(r#"{"id":"1","type":"start","payload":{"query":"{hello}"}}"#)
        .await;
    let reason = expect_close(next_event(&mut rx).await, 4400);
    assert!(reason.contains("start"), "{}", reason);
}

#[tokio::test]
async fn test_rejected_subprotocol_closes_4406() {
    let (sink, mut rx) = ChannelSink::new();
    let result = TransportWsConnection::connect(
        "graphql-ws",
        StubEngine::default().into_engine(),
        Arc::new(TransportWsOptions::default()),
        sink,
        None,
        Arc::new(Metadata::new()),
    )
    .await;

    assert!(result.is_err());
    expect_close(next_event(&mut rx).await, 4406);
}

#[tokio::test]
async fn test_on_connect_reject_closes_4403() {
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_connect: Some(Arc::new(|_scope| Ok(ConnectDecision::Reject))),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    init(&conn).await;
    let reason = expect_close(next_event(&mut rx).await, 4403);
    assert_eq!(reason, "Forbidden");
}

#[tokio::test]
async fn test_on_connect_error_closes_4500() {
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_connect: Some(Arc::new(|_scope| Err("backend unavailable".into()))),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    init(&conn).await;
    let reason = expect_close(next_event(&mut rx).await, 4500);
    assert_eq!(reason, "backend unavailable");
}

#[tokio::test]
async fn test_on_connect_payload_echoed_on_ack() {
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_connect: Some(Arc::new(|_scope| {
            Ok(ConnectDecision::Accept(Some(json!({"session": "s1"}))))
        })),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    conn.handle_text(r#"{"type":"connection_init","payload":{"token":"t"}}"#)
        .await;
    let ack = expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);
    assert_eq!(ack.payload, Some(json!({"session": "s1"})));
    assert_eq!(
        conn.scope().connection_params().unwrap().get("token"),
        Some(&json!("t"))
    );
}

#[tokio::test]
async fn test_complete_cancels_subscription() {
    let engine = StubEngine {
        hold_open: true,
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"s1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(conn.manager().subscription_count(&[]), 1);

    conn.handle_text(r#"{"id":"s1","type":"complete"}"#).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conn.manager().subscription_count(&[]), 0);

    // server-initiated cancellation emits no complete frame
    expect_silence(&mut rx).await;
}

#[tokio::test]
async fn test_single_error_results_become_error_frames() {
    let engine = StubEngine {
        stream_results: vec![
            ExecutionResult::from_error_message("boom"),
            ExecutionResult::from_data(json!({"t": "after"})),
        ],
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;

    // the modern protocol carries the whole formatted error array
    let error = expect_frame(next_event(&mut rx).await, MessageType::Error, Some("1"));
    assert_eq!(error.payload, Some(json!([{"message": "boom"}])));

    expect_frame(next_event(&mut rx).await, MessageType::Next, Some("1"));
    expect_frame(next_event(&mut rx).await, MessageType::Complete, Some("1"));
}

#[tokio::test]
async fn test_engine_failure_closes_4500() {
    let engine = StubEngine {
        fail: Some("engine exploded".to_string()),
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;
    let reason = expect_close(next_event(&mut rx).await, 4500);
    assert_eq!(reason, "engine exploded");
}

#[tokio::test]
async fn test_close_runs_hooks_and_unsubscribes_everything() {
    let disconnects = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&disconnects);
    let c = Arc::clone(&closes);

    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_disconnect: Some(Arc::new(move |_scope, _code, _reason| {
            d.fetch_add(1, Ordering::SeqCst);
        })),
        on_close: Some(Arc::new(move |_scope, _code, _reason| {
            c.fetch_add(1, Ordering::SeqCst);
        })),
        ..Default::default()
    };
    let engine = StubEngine {
        hold_open: true,
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, options).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);
    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(conn.manager().subscription_count(&[]), 1);

    conn.handle_close_frame(true, "").await;
    expect_close(next_event(&mut rx).await, 1000);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(conn.manager().subscription_count(&[]), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // close is idempotent: a second close neither fires hooks again nor
    // writes another frame
    conn.handle_close_frame(true, "").await;
    expect_silence(&mut rx).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_on_subscribe_errors_stay_operation_scoped() {
    let options = TransportWsOptions {
        connection_init_wait_timeout: Duration::from_secs(30),
        on_subscribe: Some(Arc::new(|_scope, _id, _payload| {
            Err(vec![graphsock_commons::FormattedError::new("denied")])
        })),
        ..Default::default()
    };
    let (conn, mut rx) = connect(StubEngine::default(), options).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);

    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{t}"}}"#)
        .await;

    let error = expect_frame(next_event(&mut rx).await, MessageType::Error, Some("1"));
    assert_eq!(error.payload, Some(json!([{"message": "denied"}])));

    // the connection survives and the id is free again
    assert!(!conn.is_closed());
    assert_eq!(conn.manager().subscription_count(&[]), 0);
}

#[tokio::test]
async fn test_frame_order_within_subscription() {
    // within one id the server emits (next|error)* complete? and stops
    let engine = StubEngine {
        stream_results: vec![
            ExecutionResult::from_data(json!({"n": 1})),
            ExecutionResult::from_error_message("mid-stream"),
            ExecutionResult::from_data(json!({"n": 2})),
        ],
        ..Default::default()
    };
    let (conn, mut rx) = connect(engine, long_init_timeout()).await;

    init(&conn).await;
    expect_frame(next_event(&mut rx).await, MessageType::ConnectionAck, None);
    conn.handle_text(r#"{"id":"1","type":"subscribe","payload":{"query":"subscription{n}"}}"#)
        .await;

    let mut saw_complete = false;
    let mut frames = Vec::new();
    while !saw_complete {
        match next_event(&mut rx).await {
            SinkEvent::Frame(frame) => {
                assert_eq!(frame.id.as_deref(), Some("1"));
                if frame.message_type == MessageType::Complete {
                    saw_complete = true;
                } else {
                    assert!(matches!(
                        frame.message_type,
                        MessageType::Next | MessageType::Error
                    ));
                }
                frames.push(frame.message_type);
            }
            SinkEvent::Close(code, reason) => panic!("unexpected close {}: {}", code, reason),
        }
    }
    assert_eq!(
        frames,
        vec![
            MessageType::Next,
            MessageType::Error,
            MessageType::Next,
            MessageType::Complete
        ]
    );
    expect_silence(&mut rx).await;
}
