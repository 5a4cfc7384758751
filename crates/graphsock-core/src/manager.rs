//! Per-connection subscription manager.
//!
//! Maps client-chosen operation ids to active executions. The modern
//! protocol inserts a non-streaming placeholder at the start of a subscribe
//! so duplicate ids are caught before execution begins; once the engine
//! returns a stream the placeholder is upgraded to a streaming entry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A registered operation on one connection.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub operation_id: String,
    pub operation_name: Option<String>,
    pub connection_id: String,
    /// True for a live subscription stream, false for a placeholder or a
    /// pending single-result operation.
    pub is_streaming: bool,
    /// Cancels the execution context for this operation.
    pub cancel: CancellationToken,
}

impl Subscription {
    /// A non-streaming placeholder registered before execution starts.
    pub fn placeholder(
        operation_id: impl Into<String>,
        connection_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_name: None,
            connection_id: connection_id.into(),
            is_streaming: false,
            cancel,
        }
    }

    /// A live streaming subscription.
    pub fn streaming(
        operation_id: impl Into<String>,
        operation_name: Option<String>,
        connection_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_name,
            connection_id: connection_id.into(),
            is_streaming: true,
            cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subscriber for {0} already exists")]
pub struct SubscriberAlreadyExists(pub String);

/// Thread-safe operation table.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: DashMap<String, Subscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an operation.
    ///
    /// Fails when the id is taken, except for the placeholder upgrade: a
    /// streaming entry may replace an existing non-streaming one under the
    /// same id.
    pub fn subscribe(&self, sub: Subscription) -> Result<(), SubscriberAlreadyExists> {
        match self.subscriptions.entry(sub.operation_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_streaming || !sub.is_streaming {
                    return Err(SubscriberAlreadyExists(sub.operation_id));
                }
                occupied.insert(sub);
                Ok(())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(sub);
                Ok(())
            }
        }
    }

    /// Cancels and removes the operation, returning the prior entry.
    pub fn unsubscribe(&self, operation_id: &str) -> Option<Subscription> {
        match self.subscriptions.entry(operation_id.to_string()) {
            Entry::Occupied(occupied) => {
                occupied.get().cancel.cancel();
                Some(occupied.remove())
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Cancels and removes every operation.
    pub fn unsubscribe_all(&self) {
        let ids: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.unsubscribe(&id);
        }
    }

    /// True when the operation id is registered.
    pub fn has_subscription(&self, operation_id: &str) -> bool {
        self.subscriptions.contains_key(operation_id)
    }

    /// Number of registered operations. With connection ids given, only
    /// entries belonging to one of them are counted.
    pub fn subscription_count(&self, connection_ids: &[&str]) -> usize {
        if connection_ids.is_empty() {
            return self.subscriptions.len();
        }
        self.subscriptions
            .iter()
            .filter(|entry| connection_ids.contains(&entry.connection_id.as_str()))
            .count()
    }
}
