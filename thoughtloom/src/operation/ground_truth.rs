//! GroundTruthCompare: mark thoughts solved by an evaluator.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::OperationError;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::state::{fields, State};
use crate::thought::Thought;

type Evaluator = dyn Fn(&State) -> bool + Send + Sync;

/// Sets `solved` from an evaluator over the state and passes every thought through.
pub struct GroundTruthCompare {
    evaluator: Arc<Evaluator>,
}

impl GroundTruthCompare {
    pub fn new<F>(evaluator: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        Self {
            evaluator: Arc::new(evaluator),
        }
    }

    /// Solved when `evaluation_metrics.f1_score` is at least `min_f1`.
    pub fn f1_at_least(min_f1: f64) -> Self {
        Self::new(move |state| {
            state
                .get(fields::EVALUATION_METRICS)
                .and_then(|m| m.get("f1_score"))
                .and_then(|v| v.as_f64())
                .map_or(false, |f1| f1 >= min_f1)
        })
    }
}

#[async_trait]
impl Operation for GroundTruthCompare {
    fn kind(&self) -> OperationKind {
        OperationKind::GroundTruthCompare
    }

    async fn execute(
        &self,
        mut inputs: Vec<Thought>,
        _ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        for t in &mut inputs {
            t.solved = t.valid && (self.evaluator)(&t.state);
            t.compared_to_ground_truth = true;
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::test_support::idle_context;
    use serde_json::json;

    #[tokio::test]
    async fn f1_threshold_marks_solved() {
        let ctx = idle_context();
        let hit = Thought::new(
            0,
            State::new().with(fields::EVALUATION_METRICS, json!({"f1_score": 0.85})),
        );
        let miss = Thought::new(
            1,
            State::new().with(fields::EVALUATION_METRICS, json!({"f1_score": 0.5})),
        );
        let bare = Thought::new(2, State::new());
        let out = GroundTruthCompare::f1_at_least(0.8)
            .execute(vec![hit, miss, bare], &ctx)
            .await
            .unwrap();
        assert_eq!(
            out.iter().map(|t| t.solved).collect::<Vec<_>>(),
            vec![true, false, false]
        );
        assert!(out.iter().all(|t| t.compared_to_ground_truth));
    }
}
