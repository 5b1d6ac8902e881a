//! Generate: expand every parent into `num_branches` new thoughts.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::budget::CallError;
use crate::capability::{ResponseParser, TextParser};
use crate::error::{CapabilityError, OperationError};
use crate::logging;
use crate::operation::{Operation, OperationContext, OperationKind};
use crate::state::{fields, State};
use crate::thought::Thought;

/// Result of one generation sample.
pub(crate) enum Sample {
    /// A thought was produced (possibly invalid, if the call or parse failed).
    Produced(Thought),
    /// The budget refused the call; no thought exists.
    Denied,
}

/// Derives `parent + overlay`, calls the capability once and parses the response.
///
/// Shared with the regeneration step of ValidateAndImprove.
pub(crate) async fn sample(
    ctx: &OperationContext,
    parser: &dyn ResponseParser,
    parent: &Thought,
    overlay: &State,
    seq: u64,
) -> Sample {
    let mut child = parent.derive(seq, overlay);
    let result = match ctx
        .gate
        .generate(ctx.capability.as_ref(), &child.state, 1)
        .await
    {
        Ok(responses) => match responses.first() {
            Some(response) => parser.parse(&child.state, response),
            None => Err(CapabilityError::Malformed("no response returned".into())),
        },
        Err(CallError::Denied) => {
            logging::log_call_denied(&ctx.node_id);
            return Sample::Denied;
        }
        Err(CallError::Failed(e)) => Err(e),
    };
    match result {
        Ok(updates) => {
            child.state.merge(updates);
            Sample::Produced(child)
        }
        Err(e) => {
            logging::log_sample_failed(&ctx.node_id, seq, &e);
            let mut failed = Thought::invalid(seq, child.state, e.to_string());
            failed.retries = parent.retries;
            Sample::Produced(failed)
        }
    }
}

/// Expands each input thought into `num_branches` samples.
///
/// The prompt context of every sample is the parent's state overlaid with the configured
/// `initial_state`, `perspective` and `phase`. Sequence numbers are reserved in
/// (parent, sample) order before any call is made, so output order does not depend on which call
/// finishes first.
pub struct Generate {
    num_branches: usize,
    overlay: State,
    parser: Arc<dyn ResponseParser>,
    required: bool,
}

impl Generate {
    pub fn new(num_branches: usize) -> Self {
        Self {
            num_branches,
            overlay: State::new(),
            parser: Arc::new(TextParser::default()),
            required: false,
        }
    }

    /// Sets the `perspective` field of every derived state.
    pub fn perspective(mut self, label: impl Into<String>) -> Self {
        self.overlay.set(fields::PERSPECTIVE, label.into());
        self
    }

    /// Sets the `phase` field of every derived state.
    pub fn phase(mut self, label: impl Into<String>) -> Self {
        self.overlay.set(fields::PHASE, label.into());
        self
    }

    /// Extra fields merged into every derived state before prompting.
    pub fn initial_state(mut self, state: State) -> Self {
        self.overlay.merge(state);
        self
    }

    pub fn parser(mut self, parser: impl ResponseParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// When set, a node whose every attempted sample failed stops the run.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

#[async_trait]
impl Operation for Generate {
    fn kind(&self) -> OperationKind {
        OperationKind::Generate
    }

    fn validate(&self) -> Result<(), String> {
        if self.num_branches < 1 {
            return Err("num_branches must be at least 1".into());
        }
        Ok(())
    }

    async fn execute(
        &self,
        inputs: Vec<Thought>,
        ctx: &OperationContext,
    ) -> Result<Vec<Thought>, OperationError> {
        let total = inputs.len() * self.num_branches;
        let first = ctx.sequencer.reserve(total as u64);

        let samples = inputs.iter().enumerate().flat_map(|(p, parent)| {
            (0..self.num_branches).map(move |s| {
                let seq = first + (p * self.num_branches + s) as u64;
                sample(ctx, self.parser.as_ref(), parent, &self.overlay, seq)
            })
        });
        let results = join_all(samples).await;

        let mut outputs = Vec::with_capacity(total);
        let mut last_error = None;
        for result in results {
            if let Sample::Produced(thought) = result {
                if !thought.valid {
                    last_error = thought.error.clone();
                }
                outputs.push(thought);
            }
        }

        let attempted = outputs.len();
        let failed = outputs.iter().filter(|t| !t.valid).count();
        if self.required && attempted > 0 && failed == attempted {
            return Err(OperationError::CapabilityOutage(format!(
                "all {} samples failed; last error: {}",
                attempted,
                last_error.unwrap_or_default()
            )));
        }
        Ok(outputs)
    }
}
