//! Lineage traversal
//!
//! Breadth-first walk over `references` edges. Upstream follows what a node
//! reads, downstream follows who reads it. A node is reported once at the
//! depth it was first reached.

use crate::dag::{DependencyGraph, Direction, Edge, Node, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Default traversal depth
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// One node reached by a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageStep {
    pub node: Node,

    /// Hops from the start node (1 = adjacent)
    pub depth: usize,

    /// Edge that first discovered the node
    pub via: Edge,
}

/// Result of a lineage query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub root: Node,
    pub direction: Direction,
    pub max_depth: usize,
    pub steps: Vec<LineageStep>,
}

/// Lineage queries over a borrowed graph
pub struct LineageAnalyzer<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> LineageAnalyzer<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Trace lineage for a user-supplied node name
    pub fn lineage(&self, name: &str, direction: Direction, max_depth: usize) -> Option<Lineage> {
        let root = self.graph.find_node(name)?;
        let steps = self.trace(&root.id, direction, max_depth);
        Some(Lineage {
            root,
            direction,
            max_depth,
            steps,
        })
    }

    /// Nodes reachable from `start`, ordered by depth then name
    ///
    /// Within a depth, parents are expanded in output order and each
    /// parent's edges in file/line order, so `via` is the lowest-ordered
    /// discovering edge.
    pub fn trace(&self, start: &NodeId, direction: Direction, max_depth: usize) -> Vec<LineageStep> {
        let mut steps = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::from([start.clone()]);
        let mut frontier = vec![start.clone()];

        for depth in 1..=max_depth {
            let mut discovered: BTreeMap<(String, NodeId), Edge> = BTreeMap::new();

            for parent in &frontier {
                for edge in self.graph.reference_edges(parent, direction) {
                    let next = match direction {
                        Direction::Upstream => edge.to.clone(),
                        Direction::Downstream => edge.from.clone(),
                    };
                    if visited.contains(&next) {
                        continue;
                    }
                    discovered.entry((next.name(), next)).or_insert(edge);
                }
            }

            if discovered.is_empty() {
                break;
            }

            frontier = Vec::with_capacity(discovered.len());
            for ((_, id), via) in discovered {
                visited.insert(id.clone());
                if let Some(node) = self.graph.node(&id) {
                    steps.push(LineageStep { node, depth, via });
                }
                frontier.push(id);
            }
        }

        steps
    }
}
