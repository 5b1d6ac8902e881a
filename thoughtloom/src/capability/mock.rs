//! Scripted capability and judge for tests and examples.
//!
//! [`MockCapability`] answers each call from a script (cycled by call index) or from a closure
//! over the prompt context, with an optional per-call cost and latency. It counts calls so tests
//! can assert how many were dispatched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::{GenerationCapability, Judgement, RawResponse, SimilarityJudge};
use crate::error::CapabilityError;
use crate::state::State;

/// One scripted answer.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Respond with this text.
    Text(String),
    /// Fail with `CapabilityError::Failed`.
    Fail(String),
    /// Respond with no samples at all.
    Empty,
    /// Sleep, then respond with the text (used to exercise timeouts and completion order).
    Delayed(Duration, String),
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        MockReply::Text(s.into())
    }
}

type ReplyFn = dyn Fn(&State, usize) -> MockReply + Send + Sync;

/// Generation capability driven by a script or closure.
pub struct MockCapability {
    reply: Arc<ReplyFn>,
    cost_per_call: f64,
    calls: AtomicUsize,
}

impl MockCapability {
    /// Always responds with `text`.
    pub fn fixed(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(move |_, _| MockReply::Text(text.clone()))
    }

    /// Responds with `replies[i % len]` for the i-th call (0-based).
    ///
    /// An empty script answers every call with [`MockReply::Empty`].
    pub fn sequence(replies: Vec<MockReply>) -> Self {
        Self::from_fn(move |_, i| {
            if replies.is_empty() {
                MockReply::Empty
            } else {
                replies[i % replies.len()].clone()
            }
        })
    }

    /// Computes each reply from the prompt context and the call index.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&State, usize) -> MockReply + Send + Sync + 'static,
    {
        Self {
            reply: Arc::new(f),
            cost_per_call: 0.0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Cost reported on every response (builder).
    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// Calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationCapability for MockCapability {
    async fn generate(
        &self,
        prompt_context: &State,
        sample_count: usize,
    ) -> Result<Vec<RawResponse>, CapabilityError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.reply)(prompt_context, index) {
            MockReply::Text(text) => Ok((0..sample_count.max(1))
                .map(|_| RawResponse::new(text.clone(), self.cost_per_call))
                .collect()),
            MockReply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(vec![RawResponse::new(text, self.cost_per_call)])
            }
            MockReply::Fail(msg) => Err(CapabilityError::Failed(msg)),
            MockReply::Empty => Ok(vec![]),
        }
    }
}

type JudgeFn = dyn Fn(&str, &str) -> Result<f64, CapabilityError> + Send + Sync;

/// Similarity judge driven by a closure.
pub struct MockJudge {
    judge: Arc<JudgeFn>,
    cost_per_call: f64,
    calls: AtomicUsize,
}

impl MockJudge {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<f64, CapabilityError> + Send + Sync + 'static,
    {
        Self {
            judge: Arc::new(f),
            cost_per_call: 0.0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers `similarity`.
    pub fn constant(similarity: f64) -> Self {
        Self::from_fn(move |_, _| Ok(similarity))
    }

    /// Always fails, forcing the local fallback.
    pub fn failing() -> Self {
        Self::from_fn(|_, _| Err(CapabilityError::Failed("judge unavailable".into())))
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimilarityJudge for MockJudge {
    async fn judge_similarity(&self, a: &str, b: &str) -> Result<Judgement, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let similarity = (self.judge)(a, b)?;
        Ok(Judgement {
            similarity: similarity.clamp(0.0, 1.0),
            cost: self.cost_per_call,
        })
    }
}
