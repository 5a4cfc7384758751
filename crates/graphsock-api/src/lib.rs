// GraphSock API layer
//
// The HTTP and WebSocket surface of the server: subprotocol negotiation,
// the two per-connection protocol state machines, the query/mutation
// handler, the options/hook plumbing and the IDE renderers.

pub mod handlers;
pub mod ide;
pub mod options;
pub mod routes;
pub mod scope;
pub mod ws;

pub use options::{
    ConnectDecision, GraphqlWsOptions, LegacyConnectDecision, ServerOptions, TransportWsOptions,
};
pub use scope::ConnectionScope;
