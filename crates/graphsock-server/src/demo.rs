//! A small in-process engine for the demo server.
//!
//! Resolves a `hello` query to `"world"` and serves two subscriptions: a
//! `clock` that ticks once a second and a `countdown` that emits a fixed
//! number of values and then ends the stream.

use async_trait::async_trait;
use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use graphsock_commons::ExecutionResult;
use graphsock_core::{ExecutionParams, GraphQLEngine, OperationOutcome};

pub struct DemoEngine;

#[async_trait]
impl GraphQLEngine for DemoEngine {
    async fn execute(&self, params: &ExecutionParams) -> OperationOutcome {
        if params.query.trim().is_empty() {
            return OperationOutcome::Single(ExecutionResult::from_error_message(
                "Must provide an operation.",
            ));
        }

        if params.query.contains("hello") {
            return OperationOutcome::Single(ExecutionResult::from_data(
                json!({ "hello": "world" }),
            ));
        }

        OperationOutcome::Single(ExecutionResult::from_error_message(format!(
            "Cannot query field on RootQuery: {}",
            params.query.trim()
        )))
    }

    async fn subscribe(&self, params: &ExecutionParams) -> OperationOutcome {
        if params.query.contains("countdown") {
            let count = params
                .variables
                .as_ref()
                .and_then(|vars| vars.get("from"))
                .and_then(|v| v.as_u64())
                .unwrap_or(5);
            return OperationOutcome::Stream(countdown_stream(count, params));
        }

        if params.query.contains("clock") {
            return OperationOutcome::Stream(clock_stream(params));
        }

        OperationOutcome::Single(ExecutionResult::from_error_message(format!(
            "Cannot subscribe to field on RootSubscription: {}",
            params.query.trim()
        )))
    }
}

fn clock_stream(params: &ExecutionParams) -> mpsc::UnboundedReceiver<ExecutionResult> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancelled = params.cancellation.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    if tx
                        .send(ExecutionResult::from_data(json!({ "clock": now })))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    rx
}

fn countdown_stream(from: u64, params: &ExecutionParams) -> mpsc::UnboundedReceiver<ExecutionResult> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancelled = params.cancellation.clone();

    tokio::spawn(async move {
        for value in (0..=from).rev() {
            if cancelled.is_cancelled() {
                break;
            }
            if tx
                .send(ExecutionResult::from_data(json!({ "countdown": value })))
                .is_err()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        // dropping the sender completes the subscription
    });

    rx
}
