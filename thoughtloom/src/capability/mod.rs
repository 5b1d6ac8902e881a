//! The external generation capability and the similarity judge.
//!
//! These traits are the only place the engine reaches a text-generation backend. Generate (and
//! the regeneration step of ValidateAndImprove) call [`GenerationCapability`]; capability-backed
//! scorers call [`SimilarityJudge`]. Prompt construction lives behind the trait: implementations
//! receive the whole prompt-context [`State`] and decide what to send.
//!
//! [`ResponseParser`] turns a raw response into the field updates merged into a new thought.

mod mock;
mod parser;

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::state::State;

pub use mock::{MockCapability, MockJudge, MockReply};
pub use parser::{JsonParser, LabelListParser, ResponseParser, TextParser};

/// One raw textual response and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub text: String,
    /// Cost of the call that produced this response, in budget units (e.g. dollars).
    pub cost: f64,
}

impl RawResponse {
    pub fn new(text: impl Into<String>, cost: f64) -> Self {
        Self {
            text: text.into(),
            cost,
        }
    }
}

/// Similarity estimate from a judge call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Judgement {
    /// Similarity in `[0, 1]`.
    pub similarity: f64,
    pub cost: f64,
}

/// Text-generation backend.
///
/// **Interaction**: called once per sample by Generate with `sample_count = 1`; backends that
/// support `n > 1` natively may return several responses for larger counts. The engine bounds each
/// call with the run's timeout and budget, so implementations need not.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    /// Produces `sample_count` responses for a prompt built from `prompt_context`.
    async fn generate(
        &self,
        prompt_context: &State,
        sample_count: usize,
    ) -> Result<Vec<RawResponse>, CapabilityError>;
}

/// Fuzzy/semantic comparison of two labels.
#[async_trait]
pub trait SimilarityJudge: Send + Sync {
    async fn judge_similarity(&self, a: &str, b: &str) -> Result<Judgement, CapabilityError>;
}
