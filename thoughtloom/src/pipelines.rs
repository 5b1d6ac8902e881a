//! Ready-made graph shapes.
//!
//! - [`io_graph`]: one pass, Generate → Score → (GroundTruth).
//! - [`tot_graph`]: tree-of-thought rounds; each round's KeepBestN also sees the previous best,
//!   so a round can only improve on it.
//! - [`PerspectiveMerge`]: one analysis branch per perspective, merged by Aggregate and re-scored.
//!
//! Every builder takes the parser and scorer to use and reads branch counts and thresholds from
//! [`RunConfig`].

use std::sync::Arc;

use run_config::RunConfig;

use crate::capability::ResponseParser;
use crate::graph::GraphOfOperations;
use crate::operation::{
    Aggregate, Generate, GroundTruthCompare, KeepBestN, Score, Scorer, ValidateAndImprove,
};

/// Generate(num_branches) → Score → optional GroundTruthCompare.
pub fn io_graph<P, S>(
    config: &RunConfig,
    parser: P,
    scorer: S,
    ground_truth: Option<GroundTruthCompare>,
) -> GraphOfOperations
where
    P: ResponseParser + 'static,
    S: Scorer + 'static,
{
    let mut graph = GraphOfOperations::new();
    graph
        .append_operation(
            "generate",
            Arc::new(Generate::new(config.num_branches).parser(parser)),
        )
        .append_operation("score", Arc::new(Score::new(scorer)));
    if let Some(gt) = ground_truth {
        graph.append_operation("ground_truth", Arc::new(gt));
    }
    graph
}

/// `rounds + 1` rounds of Generate → Score → KeepBestN(keep_n), then a final KeepBestN(1).
///
/// From the second round on, each KeepBestN also consumes the previous round's survivors.
pub fn tot_graph<P, S>(
    config: &RunConfig,
    rounds: usize,
    parser: P,
    scorer: S,
) -> GraphOfOperations
where
    P: ResponseParser + Clone + 'static,
    S: Scorer + Clone + 'static,
{
    let mut graph = GraphOfOperations::new();
    let mut previous_keep: Option<String> = None;
    for round in 0..=rounds {
        let keep = format!("round{}.keep", round);
        graph
            .append_operation(
                format!("round{}.generate", round),
                Arc::new(Generate::new(config.num_branches).parser(parser.clone())),
            )
            .append_operation(
                format!("round{}.score", round),
                Arc::new(Score::new(scorer.clone())),
            )
            .append_operation(keep.clone(), Arc::new(KeepBestN::new(config.keep_n)));
        if let Some(prev) = previous_keep.replace(keep.clone()) {
            graph.add_edge(prev, keep);
        }
    }
    graph.append_operation("best", Arc::new(KeepBestN::new(1)));
    graph
}

/// Builder for the multi-perspective analysis-and-merge graph.
///
/// ```text
/// per perspective:  generate(phase=analysis) → score → [improve] → keep(keep_n) ┐
///                                                                               ├→ aggregate → score → keep(1) → [ground_truth]
/// ```
pub struct PerspectiveMerge<P, S> {
    perspectives: Vec<String>,
    parser: P,
    scorer: S,
    improve: bool,
    aggregate: Option<Aggregate>,
    ground_truth: Option<GroundTruthCompare>,
}

impl<P, S> PerspectiveMerge<P, S>
where
    P: ResponseParser + Clone + 'static,
    S: Scorer + Clone + 'static,
{
    pub fn new<I, T>(perspectives: I, parser: P, scorer: S) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            perspectives: perspectives.into_iter().map(Into::into).collect(),
            parser,
            scorer,
            improve: false,
            aggregate: None,
            ground_truth: None,
        }
    }

    /// Inserts ValidateAndImprove (thresholds and retries from the config) after each branch score.
    pub fn improve(mut self, improve: bool) -> Self {
        self.improve = improve;
        self
    }

    /// Merge node to use instead of `Aggregate::new()` (e.g. with override rules).
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn ground_truth(mut self, ground_truth: GroundTruthCompare) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    pub fn build(self, config: &RunConfig) -> GraphOfOperations {
        let mut graph = GraphOfOperations::new();
        graph.add_operation("aggregate", Arc::new(self.aggregate.unwrap_or_default()));
        for perspective in &self.perspectives {
            let id = |step: &str| format!("{}.{}", perspective, step);
            let generate = Generate::new(config.num_branches)
                .perspective(perspective.clone())
                .phase("analysis")
                .parser(self.parser.clone());
            graph
                .add_operation(id("generate"), Arc::new(generate))
                .add_operation(id("score"), Arc::new(Score::new(self.scorer.clone())))
                .add_edge(id("generate"), id("score"));
            let mut last = id("score");
            if self.improve {
                let improve = ValidateAndImprove::from_config(config, self.scorer.clone())
                    .parser(self.parser.clone())
                    .phase("improve");
                graph
                    .add_operation(id("improve"), Arc::new(improve))
                    .add_edge(last, id("improve"));
                last = id("improve");
            }
            graph
                .add_operation(id("keep"), Arc::new(KeepBestN::new(config.keep_n)))
                .add_edge(last, id("keep"))
                .add_edge(id("keep"), "aggregate");
        }
        graph
            .append_operation("merge.score", Arc::new(Score::new(self.scorer)))
            .append_operation("merge.keep", Arc::new(KeepBestN::new(1)));
        if let Some(gt) = self.ground_truth {
            graph.append_operation("ground_truth", Arc::new(gt));
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{LabelListParser, TextParser};
    use crate::operation::{FnScorer, LabelSetScorer};

    #[test]
    fn io_graph_is_linear() {
        let g = io_graph(
            &RunConfig::default(),
            TextParser::default(),
            FnScorer::new(|_| 1.0),
            Some(GroundTruthCompare::f1_at_least(0.8)),
        )
        .compile()
        .unwrap();
        assert_eq!(g.ordered_ids(), vec!["generate", "score", "ground_truth"]);
    }

    #[test]
    fn tot_rounds_chain_previous_best() {
        let g = tot_graph(&RunConfig::default(), 2, TextParser::default(), FnScorer::new(|_| 1.0))
            .compile()
            .unwrap();
        let keep1 = g.index_of("round1.keep").unwrap();
        let preds: Vec<&str> = g
            .node(keep1)
            .predecessors
            .iter()
            .map(|&p| g.node(p).id.as_str())
            .collect();
        assert_eq!(preds, vec!["round1.score", "round0.keep"]);
        assert_eq!(g.terminals().len(), 1);
        assert_eq!(g.node(g.terminals()[0]).id, "best");
    }

    #[test]
    fn perspective_merge_fans_in_to_aggregate() {
        let config = RunConfig::default();
        let g = PerspectiveMerge::new(
            ["user", "system", "rules"],
            LabelListParser::new(),
            LabelSetScorer::from_config(&config),
        )
        .improve(true)
        .ground_truth(GroundTruthCompare::f1_at_least(0.8))
        .build(&config)
        .compile()
        .unwrap();
        let agg = g.index_of("aggregate").unwrap();
        assert_eq!(g.node(agg).predecessors.len(), 3);
        assert_eq!(g.roots().len(), 3);
        assert!(g.index_of("system.improve").is_some());
        let order = g.ordered_ids();
        assert_eq!(order.last(), Some(&"ground_truth"));
        let pos = |id: &str| order.iter().position(|x| *x == id).unwrap();
        assert!(pos("rules.keep") < pos("aggregate"));
        assert!(pos("aggregate") < pos("merge.score"));
    }
}
