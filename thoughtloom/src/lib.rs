//! # thoughtloom
//!
//! A graph-of-operations engine for multi-branch reasoning over an external text-generation
//! capability. A run is a DAG of operations (generate, score, select, merge, retry) acting on a
//! growing set of thoughts; independent branches run concurrently, and every capability call goes
//! through one run-wide concurrency limit, budget and timeout.
//!
//! ## Design principles
//!
//! - **Value-typed state**: a [`State`] owns all of its data; deriving a thought always copies, so
//!   no two thoughts can observe each other's mutations.
//! - **Deterministic order**: every [`Thought`] carries a creation sequence number; ties and merge
//!   order follow it, not call completion order.
//! - **Failures stay local**: a failed or malformed sample marks its own thought invalid; only
//!   node-level configuration errors (and outages on required nodes) stop a run.
//! - **Retry is a state machine**: [`ValidateAndImprove`] regenerates a middling thought at most
//!   `max_retries` times; graphs never contain cycles.
//!
//! ## Main modules
//!
//! - [`state`] / [`thought`]: [`State`], the well-known [`fields`], [`Thought`], [`Sequencer`].
//! - [`operation`]: the [`Operation`] trait and [`Generate`], [`Score`], [`KeepBestN`],
//!   [`ValidateAndImprove`], [`Aggregate`], [`GroundTruthCompare`], [`KeepValid`], [`Selector`].
//! - [`graph`]: [`GraphOfOperations`] builder and [`CompiledGraph`].
//! - [`controller`]: [`Controller::run`] → [`RunOutcome`].
//! - [`capability`]: [`GenerationCapability`], [`SimilarityJudge`], response parsers, and the
//!   [`MockCapability`] / [`MockJudge`] test doubles.
//! - [`pipelines`]: [`io_graph`], [`tot_graph`], [`PerspectiveMerge`].
//!
//! Run options are a [`RunConfig`] from the `thoughtloom-config` crate, re-exported here.

pub mod budget;
pub mod capability;
pub mod controller;
pub mod error;
pub mod graph;
pub mod logging;
pub mod operation;
pub mod pipelines;
pub mod state;
pub mod thought;

pub use budget::{CallError, CallGate, CostLedger};
pub use capability::{
    GenerationCapability, JsonParser, Judgement, LabelListParser, MockCapability, MockJudge,
    MockReply, RawResponse, ResponseParser, SimilarityJudge, TextParser,
};
pub use controller::{Controller, RunOutcome, RunStatus};
pub use error::{CapabilityError, OperationError, RunError};
pub use graph::{CompiledGraph, GraphError, GraphOfOperations, NodeSpec};
pub use operation::{
    Aggregate, FnScorer, Generate, GroundTruthCompare, KeepBestN, KeepValid, KeywordOverride,
    LabelSetScorer, MergePolicy, Operation, OperationContext, OperationKind, OverrideRule,
    RetryDecision, Score, ScoreOutcome, Scorer, Selector, ValidateAndImprove,
};
pub use pipelines::{io_graph, tot_graph, PerspectiveMerge};
pub use run_config::{RunConfig, RunConfigError};
pub use state::{fields, State};
pub use thought::{canonical_order, Sequencer, Thought};

/// When running `cargo test -p thoughtloom`, initializes tracing from `RUST_LOG` so unit tests can
/// print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
