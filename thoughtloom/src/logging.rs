//! Structured logging for graph runs.
//!
//! Node- and sample-level events are `debug`/`warn`; run start/end is `info`.

use crate::controller::RunStatus;
use crate::error::{CapabilityError, RunError};
use crate::operation::OperationKind;

/// Log run start.
pub fn log_run_start(nodes: usize, seeds: usize) {
    tracing::info!(nodes, seeds, "Starting graph run");
}

/// Log run completion with the final accounting.
pub fn log_run_complete(status: RunStatus, cost: f64, calls: u64, thoughts: usize) {
    tracing::info!(?status, cost, calls, thoughts, "Graph run complete");
}

/// Log a run that stopped with an error.
pub fn log_run_error(error: &RunError) {
    tracing::error!(?error, node = error.node(), "Graph run failed");
}

/// Log node execution start.
pub fn log_node_start(node_id: &str, kind: OperationKind, inputs: usize) {
    tracing::debug!(node_id, %kind, inputs, "Starting node execution");
}

/// Log node execution completion.
pub fn log_node_complete(node_id: &str, outputs: usize) {
    tracing::debug!(node_id, outputs, "Node execution complete");
}

/// A single sample failed; the thought is kept as invalid.
pub fn log_sample_failed(node_id: &str, seq: u64, error: &CapabilityError) {
    tracing::warn!(node_id, seq, %error, "Sample failed");
}

/// A call was refused because the budget is spent.
pub fn log_call_denied(node_id: &str) {
    tracing::debug!(node_id, "Call denied: budget exhausted");
}

/// A judge call failed and the scorer used its local estimate.
pub fn log_scorer_fallback(node_id: &str, error: &str) {
    tracing::warn!(node_id, error, "Similarity judge failed, using lexical similarity");
}

/// Budget exhausted; no further nodes will be scheduled.
pub fn log_budget_exhausted(spent: f64, limit: Option<f64>, pending_nodes: usize) {
    tracing::warn!(spent, ?limit, pending_nodes, "Budget exhausted, stopping scheduling");
}

/// Retry-loop transition for one branch.
pub fn log_retry(node_id: &str, seq: u64, attempt: u32, score: f64) {
    tracing::debug!(node_id, seq, attempt, score, "Regenerating low-scoring thought");
}
