//! Protocol-agnostic connection view handed to hooks.
//!
//! Hooks never touch the socket or the outgoing queue; they see the
//! connection through this scope: its id, negotiated subprotocol, client
//! address, init payload, acknowledgement state and metadata store.

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;

use graphsock_core::Metadata;

#[derive(Clone)]
pub struct ConnectionScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    connection_id: String,
    subprotocol: &'static str,
    client_ip: Option<String>,
    connection_params: RwLock<Option<Map<String, Value>>>,
    // init and ack carry separate locks so the init handler can hold the
    // first while the ack phase takes the second
    init_received: Mutex<bool>,
    acknowledged: Mutex<bool>,
    metadata: Arc<Metadata>,
}

impl ConnectionScope {
    pub(crate) fn new(
        subprotocol: &'static str,
        client_ip: Option<String>,
        metadata: Arc<Metadata>,
    ) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                connection_id: uuid::Uuid::new_v4().simple().to_string(),
                subprotocol,
                client_ip,
                connection_params: RwLock::new(None),
                init_received: Mutex::new(false),
                acknowledged: Mutex::new(false),
                metadata,
            }),
        }
    }

    /// Unique id of this connection.
    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    /// The negotiated WebSocket subprotocol.
    pub fn subprotocol(&self) -> &'static str {
        self.inner.subprotocol
    }

    /// Peer address the connection was upgraded from, when known.
    pub fn client_ip(&self) -> Option<&str> {
        self.inner.client_ip.as_deref()
    }

    /// The client's `connection_init` payload.
    pub fn connection_params(&self) -> Option<Map<String, Value>> {
        self.inner.connection_params.read().clone()
    }

    /// True once the first `connection_init` was handled.
    pub fn connection_init_received(&self) -> bool {
        *self.inner.init_received.lock()
    }

    /// True once the server sent `connection_ack`.
    pub fn acknowledged(&self) -> bool {
        *self.inner.acknowledged.lock()
    }

    /// Connection-scoped metadata, shared with execution params.
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.inner.metadata
    }

    pub(crate) fn set_connection_params(&self, params: Map<String, Value>) {
        *self.inner.connection_params.write() = Some(params);
    }

    pub(crate) fn init_lock(&self) -> MutexGuard<'_, bool> {
        self.inner.init_received.lock()
    }

    pub(crate) fn set_acknowledged(&self) {
        *self.inner.acknowledged.lock() = true;
    }
}
