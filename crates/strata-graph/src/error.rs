//! Error types for graph construction and ordering.

use thiserror::Error;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors detected while building or ordering a resource graph.
///
/// All of these are configuration errors surfaced before any
/// provisioning side effect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("adding '{node}' would create a dependency cycle")]
    Cycle { node: String },

    #[error("node '{consumer}' references output '{key}' of '{producer}', which is not declared")]
    UnknownReference {
        consumer: String,
        producer: String,
        key: String,
    },

    #[error("node '{consumer}' references unknown producer '{producer}'")]
    UnknownProducer { consumer: String, producer: String },

    #[error("a node named '{0}' already exists")]
    DuplicateNode(String),
}
