//! Connection-scoped metadata.
//!
//! A small key/value store attached to every connection and exposed to
//! hooks, so an `on_connect` hook can stash authorization state that a
//! later `on_subscribe` hook reads back.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Metadata {
    values: RwLock<HashMap<String, Value>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value. Empty keys are rejected.
    pub fn set(&self, key: &str, value: Value) -> bool {
        if key.is_empty() {
            return false;
        }
        self.values.write().insert(key.to_string(), value);
        true
    }

    /// Fetches a value by key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Removes a value. Empty keys are rejected.
    pub fn delete(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.values.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }
}
