//! Wire frame model for both GraphQL WebSocket subprotocols.
//!
//! Inbound frames decode into a neutral [`RawMessage`] first, then each
//! accessor re-validates the shape the message type requires. Outbound
//! frames are built through the [`OperationMessage`] constructors and
//! serialize compactly, omitting empty fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::result::{ExecutionResult, FormattedError};

/// Every message type used by either subprotocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Common
    ConnectionInit,
    ConnectionAck,
    Error,
    Complete,

    // graphql-transport-ws
    Ping,
    Pong,
    Subscribe,
    Next,

    // graphql-ws (legacy)
    #[serde(rename = "ka")]
    KeepAlive,
    ConnectionError,
    ConnectionTerminate,
    Start,
    Data,
    Stop,
}

impl MessageType {
    /// Wire name of the message type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::ConnectionInit => "connection_init",
            MessageType::ConnectionAck => "connection_ack",
            MessageType::Error => "error",
            MessageType::Complete => "complete",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Subscribe => "subscribe",
            MessageType::Next => "next",
            MessageType::KeepAlive => "ka",
            MessageType::ConnectionError => "connection_error",
            MessageType::ConnectionTerminate => "connection_terminate",
            MessageType::Start => "start",
            MessageType::Data => "data",
            MessageType::Stop => "stop",
        }
    }

    /// Resolves a wire name to a message type.
    pub fn from_name(name: &str) -> Option<Self> {
        let t = match name {
            "connection_init" => MessageType::ConnectionInit,
            "connection_ack" => MessageType::ConnectionAck,
            "error" => MessageType::Error,
            "complete" => MessageType::Complete,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "subscribe" => MessageType::Subscribe,
            "next" => MessageType::Next,
            "ka" => MessageType::KeepAlive,
            "connection_error" => MessageType::ConnectionError,
            "connection_terminate" => MessageType::ConnectionTerminate,
            "start" => MessageType::Start,
            "data" => MessageType::Data,
            "stop" => MessageType::Stop,
            _ => return None,
        };
        Some(t)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `subscribe` (modern) or `start` (legacy) frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

/// A fully formed frame, used for everything the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    pub fn new(id: Option<String>, message_type: MessageType, payload: Option<Value>) -> Self {
        Self {
            id,
            message_type,
            payload,
        }
    }

    /// `connection_ack`, optionally carrying an acknowledgement payload.
    pub fn connection_ack(payload: Option<Value>) -> Self {
        Self::new(None, MessageType::ConnectionAck, payload)
    }

    /// Legacy `connection_error` with a `{message}` payload.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::new(
            None,
            MessageType::ConnectionError,
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    /// Legacy keep-alive tick.
    pub fn keep_alive() -> Self {
        Self::new(None, MessageType::KeepAlive, None)
    }

    /// Modern `ping`, echoing an optional payload.
    pub fn ping(payload: Option<Map<String, Value>>) -> Self {
        Self::new(None, MessageType::Ping, payload.map(Value::Object))
    }

    /// Modern `pong`, echoing an optional payload.
    pub fn pong(payload: Option<Map<String, Value>>) -> Self {
        Self::new(None, MessageType::Pong, payload.map(Value::Object))
    }

    /// Modern `next` frame carrying an execution result.
    pub fn next(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(
            Some(id.into()),
            MessageType::Next,
            serde_json::to_value(result).ok(),
        )
    }

    /// Legacy `data` frame carrying an execution result.
    pub fn data(id: impl Into<String>, result: &ExecutionResult) -> Self {
        Self::new(
            Some(id.into()),
            MessageType::Data,
            serde_json::to_value(result).ok(),
        )
    }

    /// Modern `error` frame carrying the full formatted error array.
    pub fn error(id: impl Into<String>, errors: &[FormattedError]) -> Self {
        Self::new(
            Some(id.into()),
            MessageType::Error,
            serde_json::to_value(errors).ok(),
        )
    }

    /// Legacy `error` frame carrying a `{message}` payload.
    pub fn error_message(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            MessageType::Error,
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    /// `complete` for the given operation.
    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(Some(id.into()), MessageType::Complete, None)
    }

    /// Compact JSON encoding of the frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// An inbound frame before per-type validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMessage(Map<String, Value>);

impl RawMessage {
    /// Decodes a text frame into a raw message. Anything that is not a
    /// JSON object is malformed.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(ProtocolError::InvalidJson(format!(
                "expected a JSON object but got {}",
                json_type_name(&other)
            ))),
            Err(err) => Err(ProtocolError::InvalidJson(err.to_string())),
        }
    }

    fn string_field(&self, name: &'static str) -> Result<String, ProtocolError> {
        let raw = match self.0.get(name) {
            Some(Value::Null) | None => return Err(ProtocolError::MissingProperty(name)),
            Some(value) => value,
        };

        let text = raw
            .as_str()
            .ok_or_else(|| ProtocolError::InvalidPropertyType {
                field: name,
                found: json_type_name(raw).to_string(),
            })?;

        if text.is_empty() {
            return Err(ProtocolError::MissingProperty(name));
        }

        Ok(text.to_string())
    }

    /// Validates and extracts the message type.
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        let name = self.string_field("type")?;
        MessageType::from_name(&name).ok_or(ProtocolError::UnexpectedMessageType(name))
    }

    /// Validates and extracts the operation id. Required for
    /// subscribe/next/error/complete/start/stop/data frames.
    pub fn id(&self) -> Result<String, ProtocolError> {
        self.string_field("id")
    }

    /// True when a non-null payload is present.
    pub fn has_payload(&self) -> bool {
        matches!(self.0.get("payload"), Some(v) if !v.is_null())
    }

    /// The raw payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.0.get("payload").filter(|v| !v.is_null())
    }

    /// Payload as a mapping. `connection_init`/`ping`/`pong` payloads must
    /// be null or an object; anything else is malformed.
    pub fn record_payload(&self) -> Result<Option<Map<String, Value>>, ProtocolError> {
        match self.0.get("payload") {
            Some(Value::Null) | None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(other) => Err(ProtocolError::InvalidPayload(format!(
                "expected an object but got {}",
                json_type_name(other)
            ))),
        }
    }

    /// Payload as a subscribe/start payload with a non-empty query.
    pub fn subscribe_payload(&self) -> Result<SubscribePayload, ProtocolError> {
        let payload = match self.0.get("payload") {
            Some(Value::Null) | None => return Err(ProtocolError::MissingProperty("payload")),
            Some(value) => value,
        };

        let parsed: SubscribePayload = serde_json::from_value(payload.clone())
            .map_err(|err| ProtocolError::InvalidPayload(err.to_string()))?;

        if parsed.query.is_empty() {
            return Err(ProtocolError::EmptyQuery);
        }

        Ok(parsed)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
