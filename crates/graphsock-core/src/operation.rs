//! Query document parsing and operation resolution.
//!
//! Before anything reaches the engine the server parses the request string
//! and resolves which operation will run, so it can route subscriptions to
//! the streaming path and reject ambiguous documents early.

use graphql_parser::query::{parse_query, Definition, OperationDefinition};
use thiserror::Error;

/// Kind of the resolved operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// The operation selected out of a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOperation {
    pub kind: OperationKind,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("failed to parse query: {0}")]
    Parse(String),

    #[error("must provide operation name if query contains multiple operations")]
    AmbiguousOperation,

    #[error("failed to identify operation")]
    UnknownOperation,
}

/// Parses `query` and resolves the operation to execute.
///
/// With no `operation_name`, the document must contain exactly one
/// operation. With a name, the matching named operation is selected.
pub fn resolve_operation(
    query: &str,
    operation_name: Option<&str>,
) -> Result<ResolvedOperation, OperationError> {
    let document =
        parse_query::<String>(query).map_err(|err| OperationError::Parse(err.to_string()))?;

    let wanted = operation_name.filter(|name| !name.is_empty());
    let mut selected: Option<ResolvedOperation> = None;

    for definition in &document.definitions {
        let operation = match definition {
            Definition::Operation(op) => op,
            Definition::Fragment(_) => continue,
        };

        let (kind, name) = match operation {
            OperationDefinition::SelectionSet(_) => (OperationKind::Query, None),
            OperationDefinition::Query(q) => (OperationKind::Query, q.name.clone()),
            OperationDefinition::Mutation(m) => (OperationKind::Mutation, m.name.clone()),
            OperationDefinition::Subscription(s) => (OperationKind::Subscription, s.name.clone()),
        };

        match wanted {
            None => {
                if selected.is_some() {
                    return Err(OperationError::AmbiguousOperation);
                }
                selected = Some(ResolvedOperation { kind, name });
            }
            Some(wanted_name) => {
                if name.as_deref() == Some(wanted_name) {
                    selected = Some(ResolvedOperation { kind, name });
                }
            }
        }
    }

    selected.ok_or(OperationError::UnknownOperation)
}
