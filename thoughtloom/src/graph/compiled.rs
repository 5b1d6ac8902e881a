//! Compiled graph: immutable node table in topological order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::operation::Operation;

/// One compiled node: id, operation and adjacency (as indices into the node table).
pub struct NodeSpec {
    pub id: String,
    pub operation: Arc<dyn Operation>,
    pub predecessors: Vec<usize>,
    pub successors: Vec<usize>,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("id", &self.id)
            .field("kind", &self.operation.kind())
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .finish()
    }
}

/// Validated, acyclic graph ready to run.
///
/// Built by `GraphOfOperations::compile`. Node indices follow insertion order; `order` is a
/// topological order that, among ready nodes, prefers the earlier-inserted one.
#[derive(Debug)]
pub struct CompiledGraph {
    pub(super) nodes: Vec<NodeSpec>,
    pub(super) index: HashMap<String, usize>,
    pub(super) order: Vec<usize>,
    pub(super) terminals: Vec<usize>,
}

impl CompiledGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &NodeSpec {
        &self.nodes[index]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Node indices in topological order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Nodes without predecessors, in insertion order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].predecessors.is_empty())
            .collect()
    }

    /// Terminal nodes whose thoughts form the run result.
    pub fn terminals(&self) -> &[usize] {
        &self.terminals
    }

    /// Node ids in topological order.
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.nodes[i].id.as_str()).collect()
    }

    /// Nodes not yet finished whose predecessors have all finished.
    pub fn ready(&self, finished: &[bool], started: &[bool]) -> Vec<usize> {
        self.order
            .iter()
            .copied()
            .filter(|&i| !started[i] && self.nodes[i].predecessors.iter().all(|&p| finished[p]))
            .collect()
    }
}
