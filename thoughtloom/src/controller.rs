//! Controller: runs a compiled graph of operations over seed states.
//!
//! Nodes are scheduled as soon as every predecessor has finished, so independent branches run
//! concurrently; capability calls across all nodes share one concurrency limit, one budget and one
//! timeout through the run's `CallGate`. Once the budget is spent no new node is scheduled; nodes
//! already running finish (their remaining calls are refused) and the run returns whatever the
//! terminal nodes produced.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use run_config::RunConfig;
use serde::Serialize;

use crate::budget::CallGate;
use crate::capability::{GenerationCapability, SimilarityJudge};
use crate::error::RunError;
use crate::graph::{CompiledGraph, GraphOfOperations};
use crate::logging;
use crate::operation::OperationContext;
use crate::state::State;
use crate::thought::{canonical_order, Sequencer, Thought};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every node ran.
    Completed,
    /// The budget ran out; some calls were refused or nodes never ran.
    BudgetExceeded,
}

/// Result of a run: terminal thoughts plus accounting.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Thoughts of the terminal nodes, in terminal order.
    pub thoughts: Vec<Thought>,
    /// Total cost recorded.
    pub cost: f64,
    /// Capability and judge calls dispatched.
    pub calls: u64,
}

impl RunOutcome {
    /// Best terminal thought: valid before invalid, scored before unscored, then highest score;
    /// the first in terminal order on ties.
    pub fn best(&self) -> Option<&Thought> {
        self.thoughts.iter().min_by(|a, b| {
            b.valid
                .cmp(&a.valid)
                .then_with(|| match (a.ranking_score(), b.ranking_score()) {
                    (Some(x), Some(y)) => y.total_cmp(&x),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
        })
    }
}

/// Executes a compiled graph against a generation capability.
pub struct Controller {
    graph: Arc<CompiledGraph>,
    capability: Arc<dyn GenerationCapability>,
    judge: Option<Arc<dyn SimilarityJudge>>,
    config: RunConfig,
}

impl Controller {
    /// Compiles `graph` and validates `config`.
    pub fn new(
        graph: GraphOfOperations,
        capability: Arc<dyn GenerationCapability>,
        config: RunConfig,
    ) -> Result<Self, RunError> {
        Self::from_compiled(graph.compile()?, capability, config)
    }

    pub fn from_compiled(
        graph: CompiledGraph,
        capability: Arc<dyn GenerationCapability>,
        config: RunConfig,
    ) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self {
            graph: Arc::new(graph),
            capability,
            judge: None,
            config,
        })
    }

    /// Similarity judge for capability-backed scorers (builder).
    pub fn with_judge(mut self, judge: Arc<dyn SimilarityJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs the graph once. Every root node receives one fresh thought per seed state.
    ///
    /// Per-thought failures never fail the run; a node-level error aborts it and names the node.
    pub async fn run(&self, seeds: Vec<State>) -> Result<RunOutcome, RunError> {
        if seeds.is_empty() {
            let err = RunError::NoSeeds;
            logging::log_run_error(&err);
            return Err(err);
        }
        let graph = &self.graph;
        let n = graph.len();
        logging::log_run_start(n, seeds.len());

        let base = OperationContext {
            node_id: String::new(),
            gate: CallGate::new(
                self.config.concurrency_limit,
                self.config.budget_limit,
                Duration::from_secs(self.config.call_timeout_secs),
            ),
            sequencer: Arc::new(Sequencer::new()),
            capability: Arc::clone(&self.capability),
            judge: self.judge.clone(),
        };

        let mut outputs: Vec<Option<Vec<Thought>>> = vec![None; n];
        let mut started = vec![false; n];
        let mut finished = vec![false; n];
        let mut stopped = false;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !stopped && base.gate.ledger().is_exhausted() {
                stopped = true;
                let pending = started.iter().filter(|s| !**s).count();
                logging::log_budget_exhausted(
                    base.gate.ledger().spent(),
                    base.gate.ledger().limit(),
                    pending,
                );
            }
            if !stopped {
                for i in graph.ready(&finished, &started) {
                    started[i] = true;
                    let node = graph.node(i);
                    let inputs = if node.predecessors.is_empty() {
                        let first = base.sequencer.reserve(seeds.len() as u64);
                        seeds
                            .iter()
                            .enumerate()
                            .map(|(k, s)| Thought::new(first + k as u64, s.clone()))
                            .collect()
                    } else {
                        canonical_order(
                            node.predecessors
                                .iter()
                                .filter_map(|&p| outputs[p].as_ref())
                                .flatten()
                                .cloned()
                                .collect(),
                        )
                    };
                    logging::log_node_start(&node.id, node.operation.kind(), inputs.len());
                    let operation = Arc::clone(&node.operation);
                    let ctx = base.for_node(node.id.clone());
                    in_flight.push(async move {
                        let result = operation.execute(inputs, &ctx).await;
                        (i, result)
                    });
                }
            }

            match in_flight.next().await {
                None => break,
                Some((i, Ok(out))) => {
                    logging::log_node_complete(&graph.node(i).id, out.len());
                    outputs[i] = Some(out);
                    finished[i] = true;
                }
                Some((i, Err(e))) => {
                    let err = RunError::from_operation(&graph.node(i).id, e);
                    logging::log_run_error(&err);
                    return Err(err);
                }
            }
        }

        let ledger = base.gate.ledger();
        let status = if stopped || ledger.denied() > 0 {
            RunStatus::BudgetExceeded
        } else {
            RunStatus::Completed
        };
        let thoughts: Vec<Thought> = graph
            .terminals()
            .iter()
            .filter_map(|&t| outputs[t].take())
            .flatten()
            .collect();
        let outcome = RunOutcome {
            status,
            thoughts,
            cost: ledger.spent(),
            calls: ledger.calls(),
        };
        logging::log_run_complete(
            outcome.status,
            outcome.cost,
            outcome.calls,
            outcome.thoughts.len(),
        );
        Ok(outcome)
    }
}
