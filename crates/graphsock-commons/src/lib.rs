// GraphSock commons
//
// Shared building blocks for the GraphSock server crates: the wire frame
// model for both GraphQL WebSocket subprotocols, the execution result model,
// close codes and the common protocol error type.

pub mod close;
pub mod errors;
pub mod message;
pub mod result;

pub use close::{LegacyCloseCode, TransportCloseCode, SUBPROTOCOL_GRAPHQL_WS, SUBPROTOCOL_TRANSPORT_WS};
pub use errors::ProtocolError;
pub use message::{MessageType, OperationMessage, RawMessage, SubscribePayload};
pub use result::{ExecutionResult, FormattedError, SourceLocation};
