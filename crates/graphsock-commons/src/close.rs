//! Subprotocol names, close codes and protocol timing constants.

use std::time::Duration;

/// Subprotocol identifier for the modern `graphql-transport-ws` protocol.
pub const SUBPROTOCOL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// Subprotocol identifier for the legacy `graphql-ws` protocol.
pub const SUBPROTOCOL_GRAPHQL_WS: &str = "graphql-ws";

/// Maximum time a single outbound frame write may take before the
/// connection is considered corrupt.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for delivering the close control frame during teardown.
pub const CLOSE_DEADLINE: Duration = Duration::from_millis(100);

/// Default wait for `connection_init` on the modern protocol.
pub const DEFAULT_CONNECTION_INIT_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Close codes defined by the `graphql-transport-ws` protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TransportCloseCode {
    NormalClosure = 1000,
    BadRequest = 4400,
    Unauthorized = 4401,
    Forbidden = 4403,
    SubprotocolNotAcceptable = 4406,
    ConnectionInitialisationTimeout = 4408,
    SubscriberAlreadyExists = 4409,
    TooManyInitialisationRequests = 4429,
    InternalServerError = 4500,
    ConnectionAcknowledgementTimeout = 4504,
}

impl TransportCloseCode {
    /// Numeric close code carried on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Close codes used by the legacy `graphql-ws` protocol, which reuses the
/// standard WebSocket status code space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LegacyCloseCode {
    NormalClosure = 1000,
    ProtocolError = 1002,
    UnexpectedCondition = 1011,
}

impl LegacyCloseCode {
    pub fn code(self) -> u16 {
        self as u16
    }
}
