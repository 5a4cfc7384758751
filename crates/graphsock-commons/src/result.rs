//! Execution result model shared by the HTTP handler and both WebSocket
//! protocols.
//!
//! Mirrors the GraphQL response shape: `data`, `errors`, `extensions`, plus
//! the incremental-delivery fields (`path`, `label`, `hasNext`) carried by
//! `next` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Position of an error in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

/// A GraphQL error formatted for transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl FormattedError {
    /// Creates a message-only formatted error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl<E: std::error::Error> From<&E> for FormattedError {
    fn from(err: &E) -> Self {
        Self::new(err.to_string())
    }
}

/// Result of executing a GraphQL operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FormattedError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// Creates a result carrying only data.
    pub fn from_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Creates a result carrying a single message-only error.
    pub fn from_error_message(message: impl Into<String>) -> Self {
        Self {
            errors: vec![FormattedError::new(message)],
            ..Default::default()
        }
    }

    /// Returns the lone error when the result is a single-error response
    /// with no data, the shape both forwarders special-case.
    pub fn as_single_error(&self) -> Option<&FormattedError> {
        if self.errors.len() == 1 && self.data.is_none() {
            self.errors.first()
        } else {
            None
        }
    }
}
