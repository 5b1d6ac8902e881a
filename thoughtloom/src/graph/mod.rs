//! Graph of operations: builder and compilation.
//!
//! Nodes are operations keyed by id; an edge `from -> to` means `to` consumes the thoughts `from`
//! produced. Fan-out (one node feeding several) and fan-in (several feeding one) are both allowed.
//! Cycles are not: the retry loop lives inside `ValidateAndImprove`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use thoughtloom::{GraphOfOperations, Generate, KeepBestN, Score};
//!
//! let mut graph = GraphOfOperations::new();
//! graph
//!     .add_operation("generate", Arc::new(Generate::new(3)))
//!     .add_operation("score", Arc::new(Score::from_fn(|s| s.len() as f64)))
//!     .add_operation("keep", Arc::new(KeepBestN::new(1)))
//!     .add_edge("generate", "score")
//!     .add_edge("score", "keep");
//! let compiled = graph.compile()?;
//! ```

mod compile_error;
mod compiled;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::operation::Operation;

pub use compile_error::GraphError;
pub use compiled::{CompiledGraph, NodeSpec};

/// Mutable graph under construction.
#[derive(Default)]
pub struct GraphOfOperations {
    nodes: Vec<(String, Arc<dyn Operation>)>,
    edges: Vec<(String, String)>,
    terminals: Option<Vec<String>>,
}

impl GraphOfOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Ids must be unique; duplicates are reported by `compile`.
    pub fn add_operation(
        &mut self,
        id: impl Into<String>,
        operation: Arc<dyn Operation>,
    ) -> &mut Self {
        self.nodes.push((id.into(), operation));
        self
    }

    /// Adds an edge: `to` consumes the output of `from`.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds a node fed by every current leaf (node without outgoing edges).
    ///
    /// On an empty graph this is `add_operation`. Handy for linear pipelines.
    pub fn append_operation(
        &mut self,
        id: impl Into<String>,
        operation: Arc<dyn Operation>,
    ) -> &mut Self {
        let id = id.into();
        let leaves = self.leaves();
        self.add_operation(id.clone(), operation);
        for leaf in leaves {
            self.add_edge(leaf, id.clone());
        }
        self
    }

    /// Declares the terminal nodes. Without this, every node without successors is terminal.
    pub fn with_terminals<I, S>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminals = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Ids of nodes that currently have no outgoing edge, in insertion order.
    pub fn leaves(&self) -> Vec<String> {
        let sources: HashSet<&str> = self.edges.iter().map(|(f, _)| f.as_str()).collect();
        self.nodes
            .iter()
            .map(|(id, _)| id.as_str())
            .filter(|id| !sources.contains(id))
            .map(str::to_string)
            .collect()
    }

    /// Validates structure and node configuration and fixes a topological order.
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(self.nodes.len());
        for (i, (id, _)) in self.nodes.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNode(id.clone()));
            }
        }

        let mut nodes: Vec<NodeSpec> = self
            .nodes
            .into_iter()
            .map(|(id, operation)| NodeSpec {
                id,
                operation,
                predecessors: Vec::new(),
                successors: Vec::new(),
            })
            .collect();

        let mut seen_edges = HashSet::new();
        for (from, to) in &self.edges {
            let f = *index
                .get(from)
                .ok_or_else(|| GraphError::NodeNotFound(from.clone()))?;
            let t = *index
                .get(to)
                .ok_or_else(|| GraphError::NodeNotFound(to.clone()))?;
            if seen_edges.insert((f, t)) {
                nodes[f].successors.push(t);
                nodes[t].predecessors.push(f);
            }
        }

        let order = topological_order(&nodes)?;

        for node in &nodes {
            node.operation
                .validate()
                .map_err(|reason| GraphError::InvalidConfiguration {
                    node: node.id.clone(),
                    reason,
                })?;
        }

        let terminals = match self.terminals {
            Some(ids) => ids
                .iter()
                .map(|id| {
                    index
                        .get(id)
                        .copied()
                        .ok_or_else(|| GraphError::UnknownTerminal(id.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => (0..nodes.len())
                .filter(|&i| nodes[i].successors.is_empty())
                .collect(),
        };

        Ok(CompiledGraph {
            nodes,
            index,
            order,
            terminals,
        })
    }
}

/// Kahn's algorithm; among ready nodes the lowest index goes first.
fn topological_order(nodes: &[NodeSpec]) -> Result<Vec<usize>, GraphError> {
    let mut indegree: Vec<usize> = nodes.iter().map(|n| n.predecessors.len()).collect();
    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &s in &nodes[i].successors {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.insert(s);
            }
        }
    }
    if order.len() < nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| nodes[i].id.clone())
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Generate, KeepBestN, KeepValid, Score};

    fn op() -> Arc<dyn Operation> {
        Arc::new(KeepValid)
    }

    #[test]
    fn empty_graph_is_rejected() {
        assert_eq!(GraphOfOperations::new().compile().unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn duplicate_and_unknown_ids() {
        let mut g = GraphOfOperations::new();
        g.add_operation("a", op()).add_operation("a", op());
        assert_eq!(g.compile().unwrap_err(), GraphError::DuplicateNode("a".into()));

        let mut g = GraphOfOperations::new();
        g.add_operation("a", op()).add_edge("a", "missing");
        assert_eq!(g.compile().unwrap_err(), GraphError::NodeNotFound("missing".into()));
    }

    #[test]
    fn cycle_is_detected() {
        let mut g = GraphOfOperations::new();
        g.add_operation("root", op())
            .add_operation("a", op())
            .add_operation("b", op())
            .add_edge("root", "a")
            .add_edge("a", "b")
            .add_edge("b", "a");
        match g.compile().unwrap_err() {
            GraphError::Cycle(nodes) => assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn invalid_operation_config_names_the_node() {
        let mut g = GraphOfOperations::new();
        g.append_operation("gen", Arc::new(Generate::new(1)))
            .append_operation("keep", Arc::new(KeepBestN::new(0)));
        match g.compile().unwrap_err() {
            GraphError::InvalidConfiguration { node, reason } => {
                assert_eq!(node, "keep");
                assert!(reason.contains("at least 1"));
            }
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn diamond_order_and_default_terminals() {
        let mut g = GraphOfOperations::new();
        g.add_operation("gen", op())
            .add_operation("left", op())
            .add_operation("right", op())
            .add_operation("merge", op())
            .add_edge("gen", "right")
            .add_edge("gen", "left")
            .add_edge("left", "merge")
            .add_edge("right", "merge");
        let c = g.compile().unwrap();
        assert_eq!(c.ordered_ids(), vec!["gen", "left", "right", "merge"]);
        assert_eq!(c.roots(), vec![0]);
        assert_eq!(c.terminals(), &[3]);
        assert_eq!(c.node(3).predecessors, vec![1, 2]);
    }

    #[test]
    fn append_connects_all_leaves() {
        let mut g = GraphOfOperations::new();
        g.add_operation("a", op())
            .add_operation("b", op())
            .append_operation("join", Arc::new(Score::from_fn(|_| 1.0)));
        let c = g.compile().unwrap();
        let join = c.index_of("join").unwrap();
        assert_eq!(c.node(join).predecessors, vec![0, 1]);
    }

    #[test]
    fn declared_terminals_must_exist() {
        let mut g = GraphOfOperations::new();
        g.add_operation("a", op()).with_terminals(["b"]);
        assert_eq!(g.compile().unwrap_err(), GraphError::UnknownTerminal("b".into()));

        let mut g = GraphOfOperations::new();
        g.append_operation("a", op())
            .append_operation("b", op())
            .with_terminals(["a", "b"]);
        assert_eq!(g.compile().unwrap().terminals(), &[0, 1]);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut g = GraphOfOperations::new();
        g.add_operation("a", op())
            .add_operation("b", op())
            .add_edge("a", "b")
            .add_edge("a", "b");
        let c = g.compile().unwrap();
        assert_eq!(c.node(1).predecessors, vec![0]);
    }
}
