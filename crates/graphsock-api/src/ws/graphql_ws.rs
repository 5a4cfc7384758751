//! The legacy `graphql-ws` connection state machine.
//!
//! Differences from the modern protocol: acknowledgement collapses into
//! `connection_init` handling, liveness is server-push keep-alive (`ka`)
//! frames instead of ping/pong, results travel as `data` frames, and a
//! reused operation id pre-empts the previous operation instead of being an
//! error.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use graphsock_commons::close::{CLOSE_DEADLINE, SUBPROTOCOL_GRAPHQL_WS};
use graphsock_commons::{
    ExecutionResult, LegacyCloseCode, MessageType, OperationMessage, RawMessage,
};
use graphsock_core::{
    resolve_operation, ExecutionParams, GraphQLEngine, Metadata, OperationKind, OperationOutcome,
    ResultStream, Subscription, SubscriptionManager,
};

use crate::options::{GraphqlWsOptions, LegacyConnectDecision};
use crate::scope::ConnectionScope;
use crate::ws::{write_loop, MessageSink, Outgoing};

/// Delay between an error frame and the close that follows it, giving the
/// write loop a chance to drain the frame first.
const ERROR_DRAIN_DELAY: Duration = Duration::from_millis(10);

/// The negotiated subprotocol was not `graphql-ws`; the connection was
/// closed with 1002 before any loop started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subprotocol {0:?} not acceptable")]
pub struct SubprotocolRejected(pub String);

#[derive(Debug, Default)]
struct CloseState {
    closed: bool,
}

enum InitAction {
    Ignore,
    HookError(String),
    Prohibited,
    Ack(Option<Value>),
}

struct Inner<S: MessageSink> {
    scope: ConnectionScope,
    engine: Arc<dyn GraphQLEngine>,
    options: Arc<GraphqlWsOptions>,
    outgoing: Outgoing,
    manager: SubscriptionManager,
    sink: S,
    close_state: Mutex<CloseState>,
    // stops the keep-alive ticker during close
    keep_alive_cancel: CancellationToken,
    cancel: CancellationToken,
}

/// Cheap-clone handle to one legacy-protocol connection.
pub struct GraphqlWsConnection<S: MessageSink> {
    inner: Arc<Inner<S>>,
}

impl<S: MessageSink> Clone for GraphqlWsConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MessageSink> GraphqlWsConnection<S> {
    /// Establishes a connection over an upgraded socket and starts the
    /// write loop.
    pub async fn connect(
        subprotocol: &str,
        engine: Arc<dyn GraphQLEngine>,
        options: Arc<GraphqlWsOptions>,
        sink: S,
        client_ip: Option<String>,
        metadata: Arc<Metadata>,
    ) -> Result<Self, SubprotocolRejected> {
        let scope = ConnectionScope::new(SUBPROTOCOL_GRAPHQL_WS, client_ip, metadata);
        let (outgoing, rx) = Outgoing::channel();

        let conn = Self {
            inner: Arc::new(Inner {
                scope,
                engine,
                options,
                outgoing,
                manager: SubscriptionManager::new(),
                sink,
                close_state: Mutex::new(CloseState::default()),
                keep_alive_cancel: CancellationToken::new(),
                cancel: CancellationToken::new(),
            }),
        };

        if subprotocol != SUBPROTOCOL_GRAPHQL_WS {
            error!(
                "[{}] subprotocol {:?} not acceptable",
                conn.connection_id(),
                subprotocol
            );
            conn.close(LegacyCloseCode::ProtocolError, "subprotocol not acceptable")
                .await;
            return Err(SubprotocolRejected(subprotocol.to_string()));
        }

        let write_conn = conn.clone();
        let write_sink = conn.inner.sink.clone();
        let write_id = conn.connection_id().to_string();
        tokio::spawn(async move {
            if write_loop(rx, write_sink, write_id).await {
                write_conn
                    .close(LegacyCloseCode::UnexpectedCondition, "write failure")
                    .await;
            }
        });

        info!("[{}] created connection", conn.connection_id());
        Ok(conn)
    }

    pub fn scope(&self) -> &ConnectionScope {
        &self.inner.scope
    }

    pub fn manager(&self) -> &SubscriptionManager {
        &self.inner.manager
    }

    pub fn is_closed(&self) -> bool {
        self.inner.close_state.lock().closed
    }

    fn connection_id(&self) -> &str {
        self.inner.scope.connection_id()
    }

    /// Entry point for one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        let raw = match RawMessage::from_text(text) {
            Ok(raw) => raw,
            Err(err) => {
                self.fail_connection(&err.to_string()).await;
                return;
            }
        };

        let message_type = match raw.message_type() {
            Ok(t) => t,
            Err(err) => {
                // unknown frame types get an error frame, not a close
                warn!("[{}] {}", self.connection_id(), err);
                self.send_error_frame(raw.id().ok(), MessageType::Error, err.to_string());
                return;
            }
        };

        match message_type {
            MessageType::ConnectionInit => self.handle_connection_init(&raw).await,
            MessageType::ConnectionTerminate => self.handle_connection_terminate().await,
            MessageType::Start => self.handle_start(&raw).await,
            MessageType::Stop => self.handle_stop(&raw),
            other => {
                let reason = format!("unhandled message type {:?}", other.as_str());
                warn!("[{}] {}", self.connection_id(), reason);
                self.send_error_frame(raw.id().ok(), MessageType::Error, reason);
            }
        }
    }

    /// The client sent a close frame.
    pub async fn handle_close_frame(&self, normal: bool, description: &str) {
        if normal {
            self.close(
                LegacyCloseCode::NormalClosure,
                "Client requested normal closure",
            )
            .await;
        } else {
            self.fail_connection(description).await;
        }
    }

    /// The socket failed or the inbound stream ended without a close frame.
    pub async fn handle_transport_error(&self, description: &str) {
        error!(
            "[{}] force closing connection: {}",
            self.connection_id(),
            description
        );
        self.fail_connection(description).await;
    }

    /// Malformed traffic: report on the wire, then close 1011.
    async fn fail_connection(&self, description: &str) {
        self.inner
            .outgoing
            .send(OperationMessage::connection_error(description));
        tokio::time::sleep(ERROR_DRAIN_DELAY).await;
        self.close(LegacyCloseCode::UnexpectedCondition, description)
            .await;
    }

    async fn handle_connection_init(&self, raw: &RawMessage) {
        debug!("[{}] received CONNECTION_INIT", self.connection_id());

        // the init payload must be null or a mapping
        let init_params = match raw.record_payload() {
            Ok(params) => params,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                self.fail_connection(&err.to_string()).await;
                return;
            }
        };

        let action = {
            let mut init = self.inner.scope.init_lock();
            if *init {
                InitAction::Ignore
            } else {
                let action = match &self.inner.options.on_connect {
                    Some(hook) => match hook(&self.inner.scope, raw.payload()) {
                        Err(err) => InitAction::HookError(err.to_string()),
                        Ok(LegacyConnectDecision::Reject) => InitAction::Prohibited,
                        Ok(LegacyConnectDecision::Accept) => InitAction::Ack(None),
                        Ok(LegacyConnectDecision::Params(params)) => {
                            self.inner.scope.set_connection_params(params);
                            InitAction::Ack(None)
                        }
                        Ok(LegacyConnectDecision::AckPayload(payload)) => {
                            InitAction::Ack(Some(payload))
                        }
                    },
                    None => {
                        if let Some(params) = init_params.clone() {
                            self.inner.scope.set_connection_params(params);
                        }
                        InitAction::Ack(None)
                    }
                };

                if matches!(action, InitAction::Ack(_)) {
                    *init = true;
                    self.inner.scope.set_acknowledged();
                }
                action
            }
        };

        match action {
            InitAction::Ignore => {
                warn!(
                    "[{}] received multiple CONNECTION_INIT messages, ignoring duplicates",
                    self.connection_id()
                );
            }
            InitAction::HookError(err) => {
                error!("[{}] onConnect hook failed: {}", self.connection_id(), err);
                self.close(LegacyCloseCode::UnexpectedCondition, &err).await;
            }
            InitAction::Prohibited => {
                warn!(
                    "[{}] onConnect hook refused the connection",
                    self.connection_id()
                );
                self.send_error_frame(
                    None,
                    MessageType::ConnectionError,
                    "prohibited connection".to_string(),
                );
                tokio::time::sleep(ERROR_DRAIN_DELAY).await;
                self.close(LegacyCloseCode::UnexpectedCondition, "prohibited connection")
                    .await;
            }
            InitAction::Ack(payload) => {
                debug!("[{}] connection initialized", self.connection_id());
                self.inner
                    .outgoing
                    .send(OperationMessage::connection_ack(payload));
                self.start_keep_alive();
            }
        }
    }

    /// Emits one `ka` immediately, then on every tick until close.
    fn start_keep_alive(&self) {
        let period = match self.inner.options.keep_alive {
            Some(period) if !period.is_zero() => period,
            _ => return,
        };

        debug!("[{}] sending KEEP_ALIVE message", self.connection_id());
        self.inner.outgoing.send(OperationMessage::keep_alive());

        let conn = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately and the ka above
            // already covered it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = conn.inner.keep_alive_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !conn.inner.outgoing.send(OperationMessage::keep_alive()) {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn handle_connection_terminate(&self) {
        debug!("[{}] received CONNECTION_TERMINATE", self.connection_id());
        self.close(
            LegacyCloseCode::NormalClosure,
            "Client requested normal closure: terminate request",
        )
        .await;
    }

    fn handle_stop(&self, raw: &RawMessage) {
        match raw.id() {
            Ok(id) => {
                debug!("[{}] received STOP for {}", self.connection_id(), id);
                self.inner.manager.unsubscribe(&id);
            }
            Err(err) => {
                debug!("[{}] ignoring STOP: {}", self.connection_id(), err);
            }
        }
    }

    async fn handle_start(&self, raw: &RawMessage) {
        let id = match raw.id() {
            Ok(id) => id,
            Err(_) => {
                error!("[{}] START message contains no ID", self.connection_id());
                self.send_error_frame(
                    None,
                    MessageType::Error,
                    "message contains no ID".to_string(),
                );
                return;
            }
        };
        debug!("[{}] received START for {}", self.connection_id(), id);

        if !self.inner.scope.connection_init_received() {
            self.send_error_frame(
                Some(id),
                MessageType::ConnectionError,
                "attempted start operation on uninitialized connection".to_string(),
            );
            return;
        }

        // legacy reuse semantics: a repeated id replaces the previous
        // operation
        if self.inner.manager.has_subscription(&id) {
            self.inner.manager.unsubscribe(&id);
        }

        let payload = match raw.subscribe_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    "[{}] failed to parse start payload: {}",
                    self.connection_id(),
                    err
                );
                self.send_error_frame(
                    Some(id),
                    MessageType::Error,
                    format!("failed to parse start payload: {}", err),
                );
                return;
            }
        };

        let mut params = ExecutionParams::new(payload.query.clone());
        params.operation_name = payload.operation_name.clone();
        params.variables = payload.variables.clone();

        let operation = match resolve_operation(&params.query, params.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                self.send_error_frame(Some(id), MessageType::Error, err.to_string());
                return;
            }
        };

        if params.root_value.is_none() {
            if let Some(roots) = &self.inner.options.root_value_fn {
                params.root_value = roots(&self.inner.scope, operation.kind);
            }
        }
        if params.root_value.is_none() {
            params.root_value = Some(Map::new());
        }

        let op_token = self.inner.cancel.child_token();
        params.context = Arc::clone(self.inner.scope.metadata());
        params.cancellation = op_token.clone();

        let params = match &self.inner.options.on_operation {
            Some(hook) => match hook(&self.inner.scope, &id, params) {
                Ok(params) => params,
                Err(err) => {
                    error!(
                        "[{}] onOperation hook failed: {}",
                        self.connection_id(),
                        err
                    );
                    self.send_error_frame(Some(id), MessageType::Error, err.to_string());
                    op_token.cancel();
                    return;
                }
            },
            None => params,
        };

        let outcome = if operation.kind == OperationKind::Subscription {
            self.inner.engine.subscribe(&params).await
        } else {
            self.inner.engine.execute(&params).await
        };

        let operation_name = operation.name.or_else(|| params.operation_name.clone());

        match outcome {
            OperationOutcome::Stream(stream) => {
                let streaming = Subscription::streaming(
                    id.clone(),
                    operation_name,
                    self.connection_id(),
                    op_token.clone(),
                );
                if let Err(err) = self.inner.manager.subscribe(streaming) {
                    error!(
                        "[{}] subscribe operation failed: {}",
                        self.connection_id(),
                        err
                    );
                    self.send_error_frame(Some(id), MessageType::Error, err.to_string());
                    op_token.cancel();
                    return;
                }

                debug!(
                    "[{}] subscription {} SUBSCRIBED (active: {})",
                    self.connection_id(),
                    id,
                    self.inner.manager.subscription_count(&[])
                );
                self.spawn_forwarder(id, stream, op_token);
            }

            OperationOutcome::Single(result) => {
                op_token.cancel();
                self.inner.outgoing.send(OperationMessage::data(&id, &result));
                self.inner.outgoing.send(OperationMessage::complete(&id));
                self.inner.manager.unsubscribe(&id);
            }

            OperationOutcome::Failure(reason) => {
                op_token.cancel();
                error!(
                    "[{}] engine failure for {}: {}",
                    self.connection_id(),
                    id,
                    reason
                );
                self.close(LegacyCloseCode::UnexpectedCondition, &reason).await;
            }
        }
    }

    /// Relays engine results for one subscription onto the outgoing queue.
    fn spawn_forwarder(&self, id: String, mut stream: ResultStream, token: CancellationToken) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,

                    next = stream.recv() => match next {
                        None => {
                            // stream ended naturally: complete only while
                            // still registered
                            if conn.inner.manager.has_subscription(&id) {
                                conn.inner.outgoing.send(OperationMessage::complete(&id));
                            }
                            break;
                        }
                        Some(result) => conn.forward_result(&id, &result),
                    }
                }
            }

            conn.inner.manager.unsubscribe(&id);
            debug!(
                "[{}] subscription {} UNSUBSCRIBED (active: {})",
                conn.connection_id(),
                id,
                conn.inner.manager.subscription_count(&[])
            );
            if let Some(hook) = &conn.inner.options.on_operation_complete {
                hook(&conn.inner.scope, &id);
            }
        });
    }

    fn forward_result(&self, id: &str, result: &ExecutionResult) {
        if let Some(single) = result.as_single_error() {
            error!(
                "[{}] subscription {} encountered an error: {}",
                self.connection_id(),
                id,
                single.message
            );
            self.inner
                .outgoing
                .send(OperationMessage::error_message(id, single.message.clone()));
        } else {
            self.inner.outgoing.send(OperationMessage::data(id, result));
        }
    }

    fn send_error_frame(&self, id: Option<String>, message_type: MessageType, message: String) {
        self.inner.outgoing.send(OperationMessage::new(
            id,
            message_type,
            Some(serde_json::json!({ "message": message })),
        ));
    }

    /// Idempotent close sequence: stop keep-alive and the queue, deliver
    /// the close frame, cancel every subscription and run `on_disconnect`.
    pub async fn close(&self, code: LegacyCloseCode, reason: &str) {
        {
            let mut state = self.inner.close_state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        self.inner.keep_alive_cancel.cancel();
        self.inner.outgoing.close();

        let sink = self.inner.sink.clone();
        match tokio::time::timeout(CLOSE_DEADLINE, sink.close(code.code(), reason.to_string()))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!(
                "[{}] close frame not delivered, session already gone",
                self.connection_id()
            ),
            Err(_) => warn!("[{}] timed out writing close frame", self.connection_id()),
        }

        self.inner.manager.unsubscribe_all();
        self.inner.cancel.cancel();

        if self.inner.scope.connection_init_received() {
            if let Some(hook) = &self.inner.options.on_disconnect {
                hook(&self.inner.scope);
            }
        }

        info!(
            "[{}] CLOSED connection with {}: {}",
            self.connection_id(),
            code.code(),
            reason
        );
    }
}
