//! Execution engine interface.
//!
//! The GraphQL engine is an external collaborator: given a query, variables,
//! operation name, root value and a cancellation handle it either returns a
//! single result or a stream of results. Both WebSocket protocols and the
//! HTTP handler talk to it exclusively through [`GraphQLEngine`].

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metadata::Metadata;
use graphsock_commons::ExecutionResult;

/// Stream of results produced by a subscription operation. The engine owns
/// the sending half; dropping it ends the subscription naturally.
pub type ResultStream = mpsc::UnboundedReceiver<ExecutionResult>;

/// Parameters for one operation execution.
///
/// `cancellation` is a child of the connection's token: cancelling the
/// connection cancels every in-flight operation, cancelling a single
/// subscription only tears down that stream.
#[derive(Debug)]
pub struct ExecutionParams {
    pub query: String,
    pub operation_name: Option<String>,
    pub variables: Option<Map<String, Value>>,
    pub root_value: Option<Map<String, Value>>,
    /// Request- or connection-scoped values visible to resolvers.
    pub context: Arc<Metadata>,
    pub cancellation: CancellationToken,
}

impl ExecutionParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
            root_value: None,
            context: Arc::new(Metadata::new()),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Outcome of asking the engine to run an operation.
///
/// `Failure` is fatal to the connection: it represents the engine (or an
/// operation hook replacing the outcome) producing something that is
/// neither a result nor a stream.
#[derive(Debug)]
pub enum OperationOutcome {
    /// A query or mutation produced exactly one result.
    Single(ExecutionResult),
    /// A subscription produced a stream of results.
    Stream(ResultStream),
    /// The engine failed in a way that is not expressible as a GraphQL
    /// error result.
    Failure(String),
}

/// The GraphQL execution engine.
#[async_trait]
pub trait GraphQLEngine: Send + Sync {
    /// Executes a query or mutation once.
    async fn execute(&self, params: &ExecutionParams) -> OperationOutcome;

    /// Starts a subscription, returning a stream of results.
    async fn subscribe(&self, params: &ExecutionParams) -> OperationOutcome;
}
