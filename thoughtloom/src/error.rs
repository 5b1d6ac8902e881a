//! Error types.
//!
//! Three layers, matching how far a failure is allowed to travel:
//!
//! - [`CapabilityError`]: one generation or judgement call failed. Stays inside its node; the
//!   affected thought is marked invalid (or the scorer falls back to a local estimate).
//! - [`OperationError`]: a node cannot run at all. Aborts the run.
//! - [`RunError`]: what `Controller::run` returns, naming the failing node.
//!
//! Running out of budget is not an error: it ends the run with `RunStatus::BudgetExceeded`.

use thiserror::Error;

use crate::graph::GraphError;

/// Failure of a single call to the generation capability or similarity judge.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// The call did not answer within the configured timeout.
    #[error("capability call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend reported an error.
    #[error("capability call failed: {0}")]
    Failed(String),

    /// The backend answered but the response could not be used.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Node-level failure returned by `Operation::execute`.
#[derive(Debug, Error, PartialEq)]
pub enum OperationError {
    /// Required configuration or input shape is missing/invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every call of a node marked as required failed.
    #[error("capability outage: {0}")]
    CapabilityOutage(String),
}

/// Why a run stopped without an outcome.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid run config: {0}")]
    Config(#[from] run_config::RunConfigError),

    #[error("run needs at least one seed state")]
    NoSeeds,

    #[error("node '{node}' failed: configuration error: {reason}")]
    Configuration { node: String, reason: String },

    #[error("node '{node}' failed: capability outage: {reason}")]
    CapabilityOutage { node: String, reason: String },
}

impl RunError {
    /// Attaches the node id to a node-level error.
    pub fn from_operation(node: &str, err: OperationError) -> Self {
        match err {
            OperationError::Configuration(reason) => RunError::Configuration {
                node: node.to_string(),
                reason,
            },
            OperationError::CapabilityOutage(reason) => RunError::CapabilityOutage {
                node: node.to_string(),
                reason,
            },
        }
    }

    /// Id of the node that failed, for node-level errors.
    pub fn node(&self) -> Option<&str> {
        match self {
            RunError::Configuration { node, .. } | RunError::CapabilityOutage { node, .. } => {
                Some(node)
            }
            _ => None,
        }
    }
}
