//! Server options and the hook surface.
//!
//! Hooks run inline on the task that triggered them: inbound handlers run
//! on the read task, `on_next`/`on_complete` on the subscription forwarder.
//! A slow hook stalls that task, so hooks must not block; there are no
//! per-hook timeouts.

use actix_web::HttpRequest;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use graphsock_commons::close::DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT;
use graphsock_commons::{ExecutionResult, FormattedError, SubscribePayload, TransportCloseCode};
use graphsock_core::{ExecutionParams, Metadata, OperationKind, OperationOutcome};

use crate::ide::{GraphiQLOptions, PlaygroundOptions};
use crate::scope::ConnectionScope;

/// Boxed error returned by fallible hooks. A hook error is fatal to its
/// operation or, during `connection_init`, to the connection.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// What a modern `on_connect` hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectDecision {
    /// Accept the connection; the payload is echoed on `connection_ack`.
    Accept(Option<Value>),
    /// Refuse the connection (closes 4403).
    Reject,
}

/// What a legacy `on_connect` hook decided.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyConnectDecision {
    /// Accept and acknowledge.
    Accept,
    /// Refuse: `connection_error` then close 1011.
    Reject,
    /// Accept and store the mapping as the connection params.
    Params(Map<String, Value>),
    /// Accept and echo an opaque payload on `connection_ack`.
    AckPayload(Value),
}

// HTTP-level callbacks
pub type HttpRootValueFn =
    Arc<dyn Fn(&HttpRequest) -> Option<Map<String, Value>> + Send + Sync>;
pub type HttpContextFn = Arc<dyn Fn(&HttpRequest) -> Arc<Metadata> + Send + Sync>;
pub type FormatErrorFn = Arc<dyn Fn(FormattedError) -> FormattedError + Send + Sync>;
pub type ResultCallbackFn =
    Arc<dyn Fn(&ExecutionParams, &ExecutionResult, &[u8]) + Send + Sync>;

// WebSocket root values are produced per operation kind
pub type WsRootValueFn =
    Arc<dyn Fn(&ConnectionScope, OperationKind) -> Option<Map<String, Value>> + Send + Sync>;

// Modern protocol hooks
pub type TransportOnConnectFn =
    Arc<dyn Fn(&ConnectionScope) -> Result<ConnectDecision, HookError> + Send + Sync>;
pub type PingPongFn =
    Arc<dyn Fn(&ConnectionScope, Option<&Map<String, Value>>) + Send + Sync>;
pub type TransportCloseFn =
    Arc<dyn Fn(&ConnectionScope, TransportCloseCode, &str) + Send + Sync>;
pub type OnSubscribeFn = Arc<
    dyn Fn(
            &ConnectionScope,
            &str,
            &SubscribePayload,
        ) -> Result<Option<ExecutionParams>, Vec<FormattedError>>
        + Send
        + Sync,
>;
pub type TransportOnOperationFn = Arc<
    dyn Fn(
            &ConnectionScope,
            &str,
            &ExecutionParams,
            OperationOutcome,
        ) -> Result<OperationOutcome, HookError>
        + Send
        + Sync,
>;
pub type OnNextFn = Arc<
    dyn Fn(
            &ConnectionScope,
            &str,
            &ExecutionParams,
            &ExecutionResult,
        ) -> Result<Option<ExecutionResult>, HookError>
        + Send
        + Sync,
>;
pub type OnErrorFn = Arc<
    dyn Fn(
            &ConnectionScope,
            &str,
            &[FormattedError],
        ) -> Result<Option<Vec<FormattedError>>, HookError>
        + Send
        + Sync,
>;
pub type OnCompleteFn =
    Arc<dyn Fn(&ConnectionScope, &str) -> Result<(), HookError> + Send + Sync>;

// Legacy protocol hooks
pub type LegacyOnConnectFn = Arc<
    dyn Fn(&ConnectionScope, Option<&Value>) -> Result<LegacyConnectDecision, HookError>
        + Send
        + Sync,
>;
pub type LegacyOnDisconnectFn = Arc<dyn Fn(&ConnectionScope) + Send + Sync>;
pub type LegacyOnOperationFn = Arc<
    dyn Fn(&ConnectionScope, &str, ExecutionParams) -> Result<ExecutionParams, HookError>
        + Send
        + Sync,
>;
pub type LegacyOnOperationCompleteFn = Arc<dyn Fn(&ConnectionScope, &str) + Send + Sync>;

// Upgrade-time metadata seeding (the WebSocket request context)
pub type WsContextFn = Arc<dyn Fn(&HttpRequest) -> Arc<Metadata> + Send + Sync>;

/// Configuration for legacy `graphql-ws` connections.
#[derive(Clone, Default)]
pub struct GraphqlWsOptions {
    /// Period between `ka` frames; `None` disables keep-alive.
    pub keep_alive: Option<Duration>,
    pub root_value_fn: Option<WsRootValueFn>,
    pub on_connect: Option<LegacyOnConnectFn>,
    pub on_disconnect: Option<LegacyOnDisconnectFn>,
    pub on_operation: Option<LegacyOnOperationFn>,
    pub on_operation_complete: Option<LegacyOnOperationCompleteFn>,
}

/// Configuration for modern `graphql-transport-ws` connections.
#[derive(Clone)]
pub struct TransportWsOptions {
    /// How long to wait for `connection_init` before closing 4408.
    pub connection_init_wait_timeout: Duration,
    pub root_value_fn: Option<WsRootValueFn>,
    pub on_connect: Option<TransportOnConnectFn>,
    pub on_ping: Option<PingPongFn>,
    pub on_pong: Option<PingPongFn>,
    pub on_disconnect: Option<TransportCloseFn>,
    pub on_close: Option<TransportCloseFn>,
    pub on_subscribe: Option<OnSubscribeFn>,
    pub on_operation: Option<TransportOnOperationFn>,
    pub on_next: Option<OnNextFn>,
    pub on_error: Option<OnErrorFn>,
    pub on_complete: Option<OnCompleteFn>,
}

impl Default for TransportWsOptions {
    fn default() -> Self {
        Self {
            connection_init_wait_timeout: DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT,
            root_value_fn: None,
            on_connect: None,
            on_ping: None,
            on_pong: None,
            on_disconnect: None,
            on_close: None,
            on_subscribe: None,
            on_operation: None,
            on_next: None,
            on_error: None,
            on_complete: None,
        }
    }
}

/// Top-level server options.
///
/// A protocol is only advertised during subprotocol negotiation when its
/// options are present.
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Indent JSON bodies of non-streaming responses.
    pub pretty: bool,
    pub root_value_fn: Option<HttpRootValueFn>,
    pub context_fn: Option<HttpContextFn>,
    pub ws_context_fn: Option<WsContextFn>,
    pub format_error_fn: Option<FormatErrorFn>,
    pub result_callback_fn: Option<ResultCallbackFn>,
    pub graphql_ws: Option<GraphqlWsOptions>,
    pub transport_ws: Option<TransportWsOptions>,
    pub playground: Option<PlaygroundOptions>,
    pub graphiql: Option<GraphiQLOptions>,
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }
}
