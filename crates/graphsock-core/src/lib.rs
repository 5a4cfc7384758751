// GraphSock core
//
// Engine-facing abstractions shared by both WebSocket protocols and the
// HTTP handler: the execution engine trait, query/operation resolution,
// the per-connection subscription manager and connection metadata.

pub mod engine;
pub mod manager;
pub mod metadata;
pub mod operation;
pub mod util;

pub use engine::{ExecutionParams, GraphQLEngine, OperationOutcome, ResultStream};
pub use manager::{Subscription, SubscriptionManager};
pub use metadata::Metadata;
pub use operation::{resolve_operation, OperationError, OperationKind, ResolvedOperation};
