//! Errors returned by `GraphOfOperations::compile`.

use thiserror::Error;

/// Structural or configuration problem found while compiling a graph of operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// No operation was added.
    #[error("graph has no operations")]
    Empty,

    /// Two operations were added under the same id.
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    /// An edge names an id that was never added.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Edges form a cycle; lists the nodes that could not be ordered.
    #[error("graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// `Operation::validate` rejected a node's configuration.
    #[error("invalid configuration for node '{node}': {reason}")]
    InvalidConfiguration { node: String, reason: String },

    /// A declared terminal id was never added.
    #[error("unknown terminal node: {0}")]
    UnknownTerminal(String),
}
