//! ValidateAndImprove: bounded regenerate-and-rescore loop for low-scoring thoughts.
//!
//! Each branch is a small state machine driven by [`RetryDecision`]:
//!
//! ```text
//! Scored --score >= keep--------------------------> Keep     (validated, emitted)
//! Scored --retry <= score < keep, retries left----> Retry -> regenerate, rescore -> Scored
//! Scored --otherwise------------------------------> Discard  (dropped)
//! ```
//!
//! The regeneration prompt context is the current state plus a `feedback` object carrying the
//! previous score and answer. Every regeneration attempt counts, including failed ones, so a branch
//! makes at most `max_retries` capability calls here.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use run_config::RunConfig;
use serde_json::{json, Value};

use crate::capability::{ResponseParser, TextParser};
use crate::error::OperationError;
use crate::logging;
use crate::operation::generate::{sample, Sample};
use crate::operation::score::Score;
use crate::operation::{Operation, OperationContext, OperationKind, Scorer};
use crate::state::{fields, State};
use crate::thought::Thought;

/// Next step for a scored thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Keep,
    Retry,
    Discard,
}

impl RetryDecision {
    /// Decides from a score, the two thresholds and whether another attempt is allowed.
    pub fn decide(score: f64, keep_threshold: f64, retry_threshold: f64, can_retry: bool) -> Self {
        if score >= keep_threshold {
            RetryDecision::Keep
        } else if score >= retry_threshold && can_retry {
            RetryDecision::Retry
        } else {
            RetryDecision::Discard
        }
    }
}

/// Keeps good thoughts, regenerates middling ones, drops the rest.
pub struct ValidateAndImprove {
    scorer: Arc<dyn Scorer>,
    parser: Arc<dyn ResponseParser>,
    keep_threshold: f64,
    retry_threshold: f64,
    max_retries: u32,
    phase: Option<String>,
}

impl ValidateAndImprove {
    /// Thresholds 0.8 / 0.5 and two retries.
    pub fn new(scorer: impl Scorer + 'static) -> Self {
        Self {
            scorer: Arc::new(scorer),
            parser: Arc::new(TextParser::default()),
            keep_threshold: 0.8,
            retry_threshold: 0.5,
            max_retries: 2,
            phase: None,
        }
    }

    /// Thresholds and retry count taken from a run configuration.
    pub fn from_config(config: &RunConfig, scorer: impl Scorer + 'static) -> Self {
        Self::new(scorer)
            .thresholds(config.keep_threshold, config.retry_threshold)
            .max_retries(config.max_retries)
    }

    pub fn thresholds(mut self, keep: f64, retry: f64) -> Self {
        self.keep_threshold = keep;
        self.retry_threshold = retry;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Parser for regenerated responses (defaults to [`TextParser`]).
    pub fn parser(mut self, parser: impl ResponseParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// `phase` field set on regeneration prompts.
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    fn feedback_overlay(&self, current: &Thought) -> State {
        let pick = |key: &str| current.state.get(key).cloned().unwrap_or(Value::Null);
        let mut overlay = State::new()
            .with(
                fields::FEEDBACK,
                json!({
                    "previous_score": current.score,
                    "previous_answer": pick(fields::CURRENT),
                    "previous_candidates": pick(fields::CANDIDATES),
                    "previous_rationale": pick(fields::RATIONALE),
                    "attempt": current.retries + 1,
                }),
            )
            .with(fields::PREVIOUS_SCORE, current.score);
        if let Some(phase) = &self.phase {
            overlay.set(fields::PHASE, phase.clone());
        }
        overlay
    }

    /// Runs one branch to Keep (`Some`) or Discard (`None`).
    async fn settle(
        &self,
        mut current: Thought,
        ctx: &OperationContext,
    ) -> Result<Option<Thought>, OperationError> {
        if !current.scored {
            Score::apply(self.scorer.as_ref(), None, &mut current, ctx).await?;
        }
        let mut denied = false;
        loop {
            let can_retry = !denied && current.retries < self.max_retries;
            match RetryDecision::decide(
                current.score,
                self.keep_threshold,
                self.retry_threshold,
                can_retry,
            ) {
                RetryDecision::Keep => {
                    current.validated = true;
                    current.valid = true;
                    return Ok(Some(current));
                }
                RetryDecision::Discard => return Ok(None),
                RetryDecision::Retry => {
                    logging::log_retry(
                        &ctx.node_id,
                        current.seq,
                        current.retries + 1,
                        current.score,
                    );
                    let overlay = self.feedback_overlay(&current);
                    let seq = ctx.sequencer.next();
                    match sample(ctx, self.parser.as_ref(), &current, &overlay, seq).await {
                        Sample::Denied => denied = true,
                        Sample::Produced(mut next) if next.valid => {
                            Score::apply(self.scorer.as_ref(), None, &mut next, ctx).await?;
                            next.retries = current.retries + 1;
                            current = next;
                        }
                        Sample::Produced(_) => current.retries += 1,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Operation for ValidateAndImprove {
    fn kind(&self) -> OperationKind {
        OperationKind::ValidateAndImprove
    }

    fn validate(&self) -> Result<(), String> {
        if !self.keep_threshold.is_finite() || !self.retry_threshold.is_finite() {
            return Err("thresholds must be finite".into());
        }
        if self.keep_threshold <= self.retry_threshold {
            return Err(format!(
                "keep_threshold ({}) must be greater than retry_threshold ({})",
                self.keep_threshold, self.retry_threshold
            ));
        }
        self.scorer.validate()
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let settled = join_all(inputs.into_iter().map(|t| self.settle(t, ctx))).await;
        let mut kept = Vec::new();
        for r in settled {
            if let Some(t) = r? {
                kept.push(t);
            }
        }
        // Regenerated thoughts got numbers in completion order; renumber in input order.
        let first = ctx.sequencer.reserve(kept.len() as u64);
        for (i, t) in kept.iter_mut().enumerate() {
            t.seq = first + i as u64;
        }
        Ok(kept)
    }
}
