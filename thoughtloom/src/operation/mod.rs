//! Operations: the units of work a graph node runs.
//!
//! Every operation consumes the thoughts its predecessors produced (by value) and returns the
//! thoughts it hands on. Per-thought problems (a failed call, an unparsable response) stay on the
//! thought; only an [`OperationError`] stops the run.

mod aggregate;
mod generate;
mod ground_truth;
mod keep_best_n;
mod keep_valid;
mod score;
mod selector;
mod validate_and_improve;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::budget::CallGate;
use crate::capability::{GenerationCapability, SimilarityJudge};
use crate::error::OperationError;
use crate::thought::{Sequencer, Thought};

pub use aggregate::{Aggregate, KeywordOverride, MergePolicy, OverrideRule};
pub use generate::Generate;
pub use ground_truth::GroundTruthCompare;
pub use keep_best_n::KeepBestN;
pub use keep_valid::KeepValid;
pub use score::{FnScorer, LabelSetScorer, Score, ScoreOutcome, Scorer};
pub use selector::Selector;
pub use validate_and_improve::{RetryDecision, ValidateAndImprove};

/// Variant tag of an operation, used in logs and graph descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Generate,
    Score,
    KeepBestN,
    ValidateAndImprove,
    Aggregate,
    GroundTruthCompare,
    KeepValid,
    Selector,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Generate => "generate",
            OperationKind::Score => "score",
            OperationKind::KeepBestN => "keep_best_n",
            OperationKind::ValidateAndImprove => "validate_and_improve",
            OperationKind::Aggregate => "aggregate",
            OperationKind::GroundTruthCompare => "ground_truth",
            OperationKind::KeepValid => "keep_valid",
            OperationKind::Selector => "selector",
        };
        f.write_str(s)
    }
}

/// What a node can reach while executing: its id, the run's call gate and sequencer, and the
/// external capabilities.
#[derive(Clone)]
pub struct OperationContext {
    pub node_id: String,
    pub gate: CallGate,
    pub sequencer: Arc<Sequencer>,
    pub capability: Arc<dyn GenerationCapability>,
    pub judge: Option<Arc<dyn SimilarityJudge>>,
}

impl OperationContext {
    /// Copy of this context for another node.
    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("node_id", &self.node_id)
            .field("gate", &self.gate)
            .field("has_judge", &self.judge.is_some())
            .finish()
    }
}

/// A graph node's behavior.
///
/// **Interaction**: the controller calls [`Operation::validate`] once when the graph is compiled
/// and [`Operation::execute`] once per run, after every predecessor has finished. Inputs arrive
/// ordered by sequence number.
#[async_trait]
pub trait Operation: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Checks static configuration. The message becomes `GraphError::InvalidConfiguration`.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use super::*;
    use crate::capability::MockCapability;

    /// Context with a fixed capability, no budget and a generous timeout.
    pub fn context(capability: Arc<dyn GenerationCapability>) -> OperationContext {
        OperationContext {
            node_id: "test".into(),
            gate: CallGate::new(4, None, Duration::from_secs(5)),
            sequencer: Arc::new(Sequencer::new()),
            capability,
            judge: None,
        }
    }

    pub fn idle_context() -> OperationContext {
        context(Arc::new(MockCapability::fixed("unused")))
    }
}
