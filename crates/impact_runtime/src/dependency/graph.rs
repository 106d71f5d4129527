//! Build target dependency graph using petgraph.
//!
//! Edge A→B means "target A depends on target B". The graph is only used to
//! rank selected test targets by how close they are to the changed production
//! targets, so it may be partial or empty.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::warn;

/// Maximum number of targets the graph will hold.
const MAX_GRAPH_NODES: usize = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("target graph exceeded {0} nodes")]
    Overflow(usize),
}

/// Dependency graph between build targets, keyed by target name.
pub struct TargetGraph {
    graph: StableDiGraph<String, ()>,
    name_to_idx: HashMap<String, NodeIndex>,
}

impl Default for TargetGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetGraph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            name_to_idx: HashMap::new(),
        }
    }

    /// Builds a graph from `(target, depends_on)` pairs.
    pub fn from_edges<I, S>(edges: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (from, to) in edges {
            graph.add_dependency(from, to)?;
        }
        Ok(graph)
    }

    /// Adds a target to the graph, returning its node index.
    pub fn add_target(&mut self, name: impl Into<String>) -> Result<NodeIndex, GraphError> {
        let name = name.into();
        if let Some(&idx) = self.name_to_idx.get(&name) {
            return Ok(idx);
        }
        if self.graph.node_count() >= MAX_GRAPH_NODES {
            warn!(limit = MAX_GRAPH_NODES, target = %name, "target graph is full");
            return Err(GraphError::Overflow(MAX_GRAPH_NODES));
        }
        let idx = self.graph.add_node(name.clone());
        self.name_to_idx.insert(name, idx);
        Ok(idx)
    }

    /// Records that `from` depends on `to`, adding either target if missing.
    pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) -> Result<(), GraphError> {
        let from_idx = self.add_target(from)?;
        let to_idx = self.add_target(to)?;
        if self.graph.find_edge(from_idx, to_idx).is_none() {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    /// Targets the given target directly depends on.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Targets that directly depend on the given target.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.name_to_idx.get(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph.node_weight(other).map(String::as_str)
            })
            .collect()
    }

    /// Number of dependency hops from `from` to `to`.
    ///
    /// Returns `None` when either target is unknown or `to` is not reachable.
    pub fn distance(&self, from: &str, to: &str) -> Option<usize> {
        let &start = self.name_to_idx.get(from)?;
        let &goal = self.name_to_idx.get(to)?;

        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0usize)]);
        while let Some((current, hops)) = queue.pop_front() {
            if current == goal {
                return Some(hops);
            }
            for next in self.graph.neighbors_directed(current, Direction::Outgoing) {
                if visited.insert(next) {
                    queue.push_back((next, hops + 1));
                }
            }
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_idx.contains_key(name)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
