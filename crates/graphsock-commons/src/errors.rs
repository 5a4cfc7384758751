//! Shared protocol error type.
//!
//! Frame validation failures surface as `ProtocolError`. Each connection
//! maps these to its protocol-specific reaction: the modern protocol closes
//! the socket with 4400, the legacy protocol answers with an `error` or
//! `connection_error` frame.

use thiserror::Error;

/// Errors produced while decoding and validating inbound frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame body was not a JSON object.
    #[error("failed to parse message: {0}")]
    InvalidJson(String),

    /// A required property is absent, null or empty.
    #[error("message is missing the '{0}' property")]
    MissingProperty(&'static str),

    /// A property exists but has the wrong JSON type.
    #[error("message expects the '{field}' property to be a string but got {found}")]
    InvalidPropertyType { field: &'static str, found: String },

    /// The `type` property names no known message type.
    #[error("unexpected message of type {0:?} received")]
    UnexpectedMessageType(String),

    /// The payload did not match the shape required by the message type.
    #[error("failed to parse payload: {0}")]
    InvalidPayload(String),

    /// A subscribe/start payload carried an empty query string.
    #[error("query must be a non-empty string")]
    EmptyQuery,
}
