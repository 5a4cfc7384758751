//! The `graphql-transport-ws` connection state machine.
//!
//! Lifecycle: the connection is created right after the upgrade, spawns its
//! write loop and the init-wait timer, and is then fed inbound frames by
//! the read task. `connection_init` must arrive within the configured wait
//! timeout and exactly once; operations are only accepted after the
//! connection was acknowledged.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::Map;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use graphsock_commons::close::{CLOSE_DEADLINE, SUBPROTOCOL_TRANSPORT_WS};
use graphsock_commons::{
    ExecutionResult, FormattedError, OperationMessage, RawMessage, SubscribePayload,
    TransportCloseCode,
};
use graphsock_core::{
    resolve_operation, ExecutionParams, GraphQLEngine, Metadata, OperationKind, OperationOutcome,
    ResultStream, Subscription, SubscriptionManager,
};

use crate::options::{ConnectDecision, TransportWsOptions};
use crate::scope::ConnectionScope;
use crate::ws::{write_loop, MessageSink, Outgoing};

/// The negotiated subprotocol was not `graphql-transport-ws`; the
/// connection was closed with 4406 before any loop started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subprotocol {0:?} not acceptable")]
pub struct SubprotocolRejected(pub String);

#[derive(Debug, Default)]
struct CloseState {
    closed: bool,
}

struct Inner<S: MessageSink> {
    scope: ConnectionScope,
    engine: Arc<dyn GraphQLEngine>,
    options: Arc<TransportWsOptions>,
    outgoing: Outgoing,
    manager: SubscriptionManager,
    sink: S,
    close_state: Mutex<CloseState>,
    cancel: CancellationToken,
}

/// Cheap-clone handle to one modern-protocol connection.
pub struct TransportWsConnection<S: MessageSink> {
    inner: Arc<Inner<S>>,
}

impl<S: MessageSink> Clone for TransportWsConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MessageSink> TransportWsConnection<S> {
    /// Establishes a connection over an upgraded socket.
    ///
    /// Validates the negotiated subprotocol, starts the write loop and
    /// schedules the init-wait timer.
    pub async fn connect(
        subprotocol: &str,
        engine: Arc<dyn GraphQLEngine>,
        options: Arc<TransportWsOptions>,
        sink: S,
        client_ip: Option<String>,
        metadata: Arc<Metadata>,
    ) -> Result<Self, SubprotocolRejected> {
        let scope = ConnectionScope::new(SUBPROTOCOL_TRANSPORT_WS, client_ip, metadata);
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
                cancel: CancellationToken::new(),
            }),
        };

        if subprotocol != SUBPROTOCOL_TRANSPORT_WS {
            error!(
                "[{}] subprotocol {:?} not acceptable",
                conn.connection_id(),
                subprotocol
            );
            conn.close(
                TransportCloseCode::SubprotocolNotAcceptable,
                "subprotocol not acceptable",
            )
            .await;
            return Err(SubprotocolRejected(subprotocol.to_string()));
        }

        debug!(
            "[{}] server accepted graphql-transport-ws subprotocol",
            conn.connection_id()
        );

        // write loop: sole consumer of the outgoing queue
        let write_conn = conn.clone();
        let write_sink = conn.inner.sink.clone();
        let write_id = conn.connection_id().to_string();
        tokio::spawn(async move {
            if write_loop(rx, write_sink, write_id).await {
                write_conn
                    .close(TransportCloseCode::InternalServerError, "write failure")
                    .await;
            }
        });

        conn.schedule_init_timeout();
        Ok(conn)
    }

    /// The protocol-agnostic view hooks receive.
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

    fn schedule_init_timeout(&self) {
        let conn = self.clone();
        let wait = self.inner.options.connection_init_wait_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = conn.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(wait) => {
                    if !conn.inner.scope.connection_init_received() {
                        error!(
                            "[{}] connection initialisation timeout",
                            conn.connection_id()
                        );
                        conn.close(
                            TransportCloseCode::ConnectionInitialisationTimeout,
                            "connection initialisation timeout",
                        )
                        .await;
                    }
                }
            }
        });
    }

    /// Entry point for one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        let raw = match RawMessage::from_text(text) {
            Ok(raw) => raw,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        let message_type = match raw.message_type() {
            Ok(t) => t,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        use graphsock_commons::MessageType::*;
        match message_type {
            ConnectionInit => self.handle_connection_init(&raw).await,
            Ping => self.handle_ping(&raw).await,
            Pong => self.handle_pong(&raw).await,
            Subscribe => self.handle_subscribe(&raw).await,
            Complete => self.handle_complete(&raw).await,
            other => {
                let reason = format!("unexpected message of type {:?} received", other.as_str());
                error!("[{}] {}", self.connection_id(), reason);
                self.close(TransportCloseCode::BadRequest, &reason).await;
            }
        }
    }

    /// The client sent a close frame.
    pub async fn handle_close_frame(&self, normal: bool, description: &str) {
        if normal {
            self.close(
                TransportCloseCode::NormalClosure,
                "Client requested normal closure",
            )
            .await;
        } else {
            self.close(TransportCloseCode::BadRequest, description).await;
        }
    }

    /// The socket failed or the inbound stream ended without a close frame.
    pub async fn handle_transport_error(&self, description: &str) {
        error!(
            "[{}] force closing connection: {}",
            self.connection_id(),
            description
        );
        self.close(TransportCloseCode::BadRequest, description).await;
    }

    async fn handle_connection_init(&self, raw: &RawMessage) {
        debug!("[{}] received CONNECTION_INIT", self.connection_id());

        let already_initialised = {
            let mut init = self.inner.scope.init_lock();
            if *init {
                true
            } else {
                *init = true;
                false
            }
        };

        if already_initialised {
            error!("[{}] too many initialisation requests", self.connection_id());
            self.close(
                TransportCloseCode::TooManyInitialisationRequests,
                "too many initialisation requests",
            )
            .await;
            return;
        }

        match raw.record_payload() {
            Ok(Some(params)) => self.inner.scope.set_connection_params(params),
            Ok(None) => {}
            Err(err) => {
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        }

        let decision = match &self.inner.options.on_connect {
            Some(hook) => match hook(&self.inner.scope) {
                Ok(decision) => decision,
                Err(err) => {
                    error!("[{}] onConnect hook failed: {}", self.connection_id(), err);
                    self.close(TransportCloseCode::InternalServerError, &err.to_string())
                        .await;
                    return;
                }
            },
            None => ConnectDecision::Accept(None),
        };

        match decision {
            ConnectDecision::Reject => {
                warn!(
                    "[{}] onConnect hook refused the connection",
                    self.connection_id()
                );
                self.close(TransportCloseCode::Forbidden, "Forbidden").await;
            }
            ConnectDecision::Accept(payload) => {
                self.inner
                    .outgoing
                    .send(OperationMessage::connection_ack(payload));
                self.inner.scope.set_acknowledged();
                debug!("[{}] acknowledged connection", self.connection_id());
            }
        }
    }

    async fn handle_ping(&self, raw: &RawMessage) {
        let payload = match raw.record_payload() {
            Ok(payload) => payload,
            Err(err) => {
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        if let Some(hook) = &self.inner.options.on_ping {
            hook(&self.inner.scope, payload.as_ref());
            return;
        }

        self.inner.outgoing.send(OperationMessage::pong(payload));
    }

    async fn handle_pong(&self, raw: &RawMessage) {
        let payload = match raw.record_payload() {
            Ok(payload) => payload,
            Err(err) => {
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        if let Some(hook) = &self.inner.options.on_pong {
            hook(&self.inner.scope, payload.as_ref());
        }
    }

    async fn handle_complete(&self, raw: &RawMessage) {
        let id = match raw.id() {
            Ok(id) => id,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };
        debug!("[{}] received COMPLETE for {}", self.connection_id(), id);
        self.inner.manager.unsubscribe(&id);
    }

    async fn handle_subscribe(&self, raw: &RawMessage) {
        let id = match raw.id() {
            Ok(id) => id,
            Err(err) => {
                error!("[{}] subscribe failed: {}", self.connection_id(), err);
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        if !self.inner.scope.acknowledged() {
            error!(
                "[{}] subscribe on unacknowledged connection",
                self.connection_id()
            );
            self.close(TransportCloseCode::Unauthorized, "not authorized")
                .await;
            return;
        }

        // reserve the id before execution so duplicates are caught early
        let op_token = self.inner.cancel.child_token();
        let placeholder =
            Subscription::placeholder(id.clone(), self.connection_id(), op_token.clone());
        if self.inner.manager.subscribe(placeholder).is_err() {
            let reason = format!("subscriber for {} already exists", id);
            error!("[{}] {}", self.connection_id(), reason);
            self.close(TransportCloseCode::SubscriberAlreadyExists, &reason)
                .await;
            return;
        }

        let payload = match raw.subscribe_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    "[{}] invalid subscribe payload: {}",
                    self.connection_id(),
                    err
                );
                self.close(TransportCloseCode::BadRequest, &err.to_string())
                    .await;
                return;
            }
        };

        let mut params = match &self.inner.options.on_subscribe {
            Some(hook) => match hook(&self.inner.scope, &id, &payload) {
                Err(errors) => {
                    let errors = if errors.is_empty() {
                        vec![FormattedError::new(
                            "invalid return value from onSubscribe hook, expected an array of GraphQL errors",
                        )]
                    } else {
                        errors
                    };
                    let _ = self.send_error(&id, errors);
                    self.inner.manager.unsubscribe(&id);
                    return;
                }
                Ok(Some(params)) => params,
                Ok(None) => params_from_payload(&payload),
            },
            None => params_from_payload(&payload),
        };

        let operation = match resolve_operation(&params.query, params.operation_name.as_deref()) {
            Ok(operation) => operation,
            Err(err) => {
                error!("[{}] {}", self.connection_id(), err);
                let _ = self.send_error(&id, vec![FormattedError::new(err.to_string())]);
                self.inner.manager.unsubscribe(&id);
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

        params.context = Arc::clone(self.inner.scope.metadata());
        params.cancellation = op_token.clone();

        let outcome = if operation.kind == OperationKind::Subscription {
            self.inner.engine.subscribe(&params).await
        } else {
            self.inner.engine.execute(&params).await
        };

        let outcome = match &self.inner.options.on_operation {
            Some(hook) => match hook(&self.inner.scope, &id, &params, outcome) {
                Ok(outcome) => outcome,
                Err(err) => {
                    op_token.cancel();
                    error!(
                        "[{}] onOperation hook failed: {}",
                        self.connection_id(),
                        err
                    );
                    let _ = self.send_error(
                        &id,
                        vec![FormattedError::new(format!(
                            "onOperation hook failed: {}",
                            err
                        ))],
                    );
                    self.inner.manager.unsubscribe(&id);
                    return;
                }
            },
            None => outcome,
        };

        let operation_name = operation.name.or_else(|| params.operation_name.clone());

        match outcome {
            OperationOutcome::Stream(stream) => {
                // the client may have completed the placeholder while the
                // engine was starting up
                if !self.inner.manager.has_subscription(&id) {
                    op_token.cancel();
                    self.send_complete(&id, false);
                    return;
                }

                let streaming = Subscription::streaming(
                    id.clone(),
                    operation_name,
                    self.connection_id(),
                    op_token.clone(),
                );
                if self.inner.manager.subscribe(streaming).is_err() {
                    op_token.cancel();
                    let reason = format!("subscriber for {} already exists", id);
                    self.close(TransportCloseCode::SubscriberAlreadyExists, &reason)
                        .await;
                    return;
                }

                debug!(
                    "[{}] subscription {} SUBSCRIBED (active: {})",
                    self.connection_id(),
                    id,
                    self.inner.manager.subscription_count(&[])
                );
                self.spawn_forwarder(id, Arc::new(params), stream, op_token);
            }

            OperationOutcome::Single(result) => {
                op_token.cancel();
                let notify = self.inner.manager.has_subscription(&id);
                if notify {
                    if let Err(err) = self.send_next(&id, &params, &result) {
                        self.close(TransportCloseCode::InternalServerError, &err)
                            .await;
                        return;
                    }
                }
                self.send_complete(&id, notify);
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
                self.close(TransportCloseCode::InternalServerError, &reason)
                    .await;
            }
        }
    }

    /// Relays engine results for one subscription onto the outgoing queue.
    fn spawn_forwarder(
        &self,
        id: String,
        params: Arc<ExecutionParams>,
        mut stream: ResultStream,
        token: CancellationToken,
    ) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,

                    next = stream.recv() => match next {
                        None => {
                            // natural end of the stream: complete on the
                            // wire only while still registered
                            conn.send_complete(&id, conn.inner.manager.has_subscription(&id));
                            break;
                        }
                        Some(result) => {
                            if result.as_single_error().is_some() {
                                if let Err(err) = conn.send_error(&id, result.errors.clone()) {
                                    warn!(
                                        "[{}] onError hook failed for {}: {}",
                                        conn.connection_id(),
                                        id,
                                        err
                                    );
                                }
                            } else if let Err(err) = conn.send_next(&id, &params, &result) {
                                conn.close(TransportCloseCode::InternalServerError, &err).await;
                                break;
                            }
                        }
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
        });
    }

    fn send_next(
        &self,
        id: &str,
        params: &ExecutionParams,
        result: &ExecutionResult,
    ) -> Result<(), String> {
        let mut result = result.clone();
        if let Some(hook) = &self.inner.options.on_next {
            match hook(&self.inner.scope, id, params, &result) {
                Ok(Some(replacement)) => result = replacement,
                Ok(None) => {}
                Err(err) => return Err(format!("onNext hook failed: {}", err)),
            }
        }
        self.inner.outgoing.send(OperationMessage::next(id, &result));
        Ok(())
    }

    fn send_error(&self, id: &str, errors: Vec<FormattedError>) -> Result<(), String> {
        let mut errors = errors;
        if let Some(hook) = &self.inner.options.on_error {
            match hook(&self.inner.scope, id, &errors) {
                Ok(Some(replacement)) => errors = replacement,
                Ok(None) => {}
                Err(err) => return Err(format!("onError hook failed: {}", err)),
            }
        }
        self.inner.outgoing.send(OperationMessage::error(id, &errors));
        Ok(())
    }

    fn send_complete(&self, id: &str, notify: bool) {
        if let Some(hook) = &self.inner.options.on_complete {
            if let Err(err) = hook(&self.inner.scope, id) {
                warn!(
                    "[{}] onComplete hook failed for {}: {}",
                    self.connection_id(),
                    id,
                    err
                );
            }
        }
        if notify {
            self.inner.outgoing.send(OperationMessage::complete(id));
        }
    }

    /// Idempotent close sequence: stop the queue, deliver the close frame,
    /// cancel every subscription and run the lifecycle hooks.
    pub async fn close(&self, code: TransportCloseCode, reason: &str) {
        {
            let mut state = self.inner.close_state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }

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

        if self.inner.scope.acknowledged() {
            if let Some(hook) = &self.inner.options.on_disconnect {
                hook(&self.inner.scope, code, reason);
            }
        }
        if let Some(hook) = &self.inner.options.on_close {
            hook(&self.inner.scope, code, reason);
        }

        info!(
            "[{}] CLOSED connection with {}: {}",
            self.connection_id(),
            code.code(),
            reason
        );
    }
}

fn params_from_payload(payload: &SubscribePayload) -> ExecutionParams {
    let mut params = ExecutionParams::new(payload.query.clone());
    params.operation_name = payload.operation_name.clone();
    params.variables = payload.variables.clone();
    params
}
