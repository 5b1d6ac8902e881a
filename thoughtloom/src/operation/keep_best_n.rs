//! KeepBestN: keep the N best-scored thoughts.

use std::cmp::Ordering;

use async_trait::async_trait;

use crate::error::OperationError;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::thought::Thought;

/// Keeps the first `n` thoughts by (scored first, score, sequence number).
///
/// Ties keep the earlier-created thought. Output thoughts are independent copies under fresh
/// sequence numbers issued in output order, so downstream nodes see the ranking as creation order.
#[derive(Debug, Clone)]
pub struct KeepBestN {
    n: usize,
    highest_is_best: bool,
}

impl KeepBestN {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            highest_is_best: true,
        }
    }

    /// Lower scores win (builder).
    pub fn lowest_is_best(mut self) -> Self {
        self.highest_is_best = false;
        self
    }

    fn rank(&self, a: &Thought, b: &Thought) -> Ordering {
        match (a.ranking_score(), b.ranking_score()) {
            (Some(x), Some(y)) => {
                let by_score = if self.highest_is_best {
                    y.total_cmp(&x)
                } else {
                    x.total_cmp(&y)
                };
                by_score.then(a.seq.cmp(&b.seq))
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.seq.cmp(&b.seq),
        }
    }

    /// The selection without re-sequencing.
    pub fn select(&self, mut thoughts: Vec<Thought>) -> Vec<Thought> {
        thoughts.sort_by(|a, b| self.rank(a, b));
        thoughts.truncate(self.n);
        thoughts
    }
}

#[async_trait]
impl Operation for KeepBestN {
    fn kind(&self) -> OperationKind {
        OperationKind::KeepBestN
    }

    fn validate(&self) -> Result<(), String> {
        if self.n < 1 {
            return Err("n must be at least 1".into());
        }
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let kept = self.select(inputs);
        let first = ctx.sequencer.reserve(kept.len() as u64);
        Ok(kept
            .iter()
            .enumerate()
            .map(|(i, t)| t.duplicate(first + i as u64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::test_support::idle_context;
    use crate::state::State;

    fn scored(seq: u64, score: f64) -> Thought {
        let mut t = Thought::new(seq, State::new().with("id", seq));
        t.score = score;
        t.scored = true;
        t
    }

    fn ids(ts: &[Thought]) -> Vec<u64> {
        ts.iter()
            .map(|t| t.state.get("id").and_then(|v| v.as_u64()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn keeps_highest_scores() {
        let ctx = idle_context();
        let out = KeepBestN::new(2)
            .execute(vec![scored(0, 0.3), scored(1, 0.9), scored(2, 0.5)], &ctx)
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1, 2]);
        assert_eq!(out[0].score, 0.9);
        assert!(out[0].seq < out[1].seq);
    }

    #[tokio::test]
    async fn lowest_is_best_reverses_order() {
        let ctx = idle_context();
        let out = KeepBestN::new(1)
            .lowest_is_best()
            .execute(vec![scored(0, 0.3), scored(1, 0.1)], &ctx)
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1]);
    }

    #[test]
    fn ties_keep_first_created() {
        let k = KeepBestN::new(1);
        let out = k.select(vec![scored(5, 0.7), scored(2, 0.7), scored(9, 0.7)]);
        assert_eq!(out[0].seq, 2);
    }

    #[test]
    fn scored_beats_unscored() {
        let k = KeepBestN::new(2);
        let unscored = Thought::new(0, State::new().with("id", 0u64));
        let out = k.select(vec![unscored, scored(1, 0.0), scored(2, 0.1)]);
        assert_eq!(ids(&out), vec![2, 1]);
    }

    #[tokio::test]
    async fn output_size_is_min_of_n_and_input() {
        let ctx = idle_context();
        let out = KeepBestN::new(5)
            .execute(vec![scored(0, 0.1), scored(1, 0.2)], &ctx)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        let out = KeepBestN::new(3).execute(vec![], &ctx).await.unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn zero_is_invalid() {
        assert!(KeepBestN::new(0).validate().is_err());
    }
}
