//! Circular dependency detection over `references` edges

use crate::dag::{DependencyGraph, Direction, NodeId};
use serde::{Deserialize, Serialize};
use sqlweave_core::{Diagnostic, DiagnosticCode, Location, Severity};
use std::collections::{BTreeSet, HashMap};

/// A dependency cycle, rotated so the smallest node comes first
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cycle {
    pub nodes: Vec<NodeId>,
}

impl Cycle {
    fn canonical(mut nodes: Vec<NodeId>) -> Self {
        if let Some(start) = nodes
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(index, _)| index)
        {
            nodes.rotate_left(start);
        }
        Self { nodes }
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    /// `a -> b -> a`
    pub fn path(&self) -> String {
        let mut parts: Vec<String> = self.nodes.iter().map(|node| node.to_string()).collect();
        if let Some(first) = parts.first().cloned() {
            parts.push(first);
        }
        parts.join(" -> ")
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diagnostic = Diagnostic::new(
            DiagnosticCode::CircularDependency,
            Severity::Warn,
            format!("Circular dependency: {}", self.path()),
        )
        .with_impact(self.nodes.iter().map(|node| node.to_string()).collect());

        if let Some(NodeId::File(path)) = self.nodes.iter().find(|node| node.is_file()) {
            diagnostic = diagnostic.with_location(Location::new(path.display().to_string()));
        }
        diagnostic
    }
}

const UNSEEN: usize = usize::MAX;

impl DependencyGraph {
    /// Report every elementary cycle over `references` edges exactly once
    ///
    /// Nodes are numbered in sorted order. For each start node, the strongly
    /// connected component containing it among nodes numbered at or above it
    /// is searched for circuits closing back on the start (Johnson). Every
    /// cycle is found from its lowest node only, so cycles sharing nodes are
    /// all reported. Self-references count as cycles of length one.
    pub fn detect_circular_dependencies(&self) -> Vec<Cycle> {
        let nodes: Vec<NodeId> = self.all_nodes().into_iter().map(|node| node.id).collect();
        let index: HashMap<&NodeId, usize> = nodes.iter().enumerate().map(|(i, node)| (node, i)).collect();
        let adjacency: Vec<Vec<usize>> = nodes
            .iter()
            .map(|node| {
                let mut next: Vec<usize> = self
                    .neighbors(node, Direction::Upstream)
                    .iter()
                    .filter_map(|neighbor| index.get(neighbor).copied())
                    .collect();
                next.sort_unstable();
                next.dedup();
                next
            })
            .collect();

        let mut found: BTreeSet<Cycle> = BTreeSet::new();
        for start in 0..nodes.len() {
            if adjacency[start].is_empty() {
                continue;
            }
            let members = component_of(&adjacency, start);
            let mut circuits = Circuits::new(&adjacency, members, start);
            circuits.search(start);

            for circuit in circuits.found {
                found.insert(Cycle::canonical(circuit.into_iter().map(|i| nodes[i].clone()).collect()));
            }
        }

        found.into_iter().collect()
    }
}

/// Members of the strongly connected component containing `start`, within
/// the subgraph of nodes numbered `start` or higher (iterative Tarjan)
fn component_of(adjacency: &[Vec<usize>], start: usize) -> Vec<bool> {
    let count = adjacency.len();
    let mut order = vec![UNSEEN; count];
    let mut low = vec![0; count];
    let mut on_stack = vec![false; count];
    let mut stack = vec![start];
    let mut members = vec![false; count];

    order[start] = 0;
    on_stack[start] = true;
    let mut counter = 1;
    let mut frames: Vec<(usize, usize)> = vec![(start, 0)];

    while let Some(frame) = frames.last_mut() {
        let (node, cursor) = *frame;
        if let Some(&next) = adjacency[node].get(cursor) {
            frame.1 += 1;
            if next < start {
                continue;
            }
            if order[next] == UNSEEN {
                order[next] = counter;
                low[next] = counter;
                counter += 1;
                stack.push(next);
                on_stack[next] = true;
                frames.push((next, 0));
            } else if on_stack[next] {
                low[node] = low[node].min(order[next]);
            }
            continue;
        }

        frames.pop();
        if low[node] == order[node] {
            while let Some(member) = stack.pop() {
                on_stack[member] = false;
                if node == start {
                    members[member] = true;
                }
                if member == node {
                    break;
                }
            }
        }
        if let Some(&(parent, _)) = frames.last() {
            low[parent] = low[parent].min(low[node]);
        }
    }

    members
}

/// Circuit search rooted at `start`, restricted to one component
struct Circuits<'a> {
    adjacency: &'a [Vec<usize>],
    members: Vec<bool>,
    start: usize,
    blocked: Vec<bool>,
    blocked_by: Vec<BTreeSet<usize>>,
    path: Vec<usize>,
    found: Vec<Vec<usize>>,
}

impl<'a> Circuits<'a> {
    fn new(adjacency: &'a [Vec<usize>], members: Vec<bool>, start: usize) -> Self {
        let count = adjacency.len();
        Self {
            adjacency,
            members,
            start,
            blocked: vec![false; count],
            blocked_by: vec![BTreeSet::new(); count],
            path: Vec::new(),
            found: Vec::new(),
        }
    }

    fn search(&mut self, node: usize) -> bool {
        let adjacency = self.adjacency;
        let mut closed = false;
        self.path.push(node);
        self.blocked[node] = true;

        for &next in &adjacency[node] {
            if !self.members[next] {
                continue;
            }
            if next == self.start {
                self.found.push(self.path.clone());
                closed = true;
            } else if !self.blocked[next] && self.search(next) {
                closed = true;
            }
        }

        if closed {
            self.unblock(node);
        } else {
            for &next in &adjacency[node] {
                if self.members[next] {
                    self.blocked_by[next].insert(node);
                }
            }
        }

        self.path.pop();
        closed
    }

    fn unblock(&mut self, node: usize) {
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if !self.blocked[current] {
                continue;
            }
            self.blocked[current] = false;
            pending.extend(std::mem::take(&mut self.blocked_by[current]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlweave_core::{Definition, DefinitionKind, Reference};
    use std::path::Path;

    fn view(graph: &mut DependencyGraph, name: &str, reads: &[&str]) {
        let file = format!("{}.sql", name);
        let references: Vec<Reference> = reads
            .iter()
            .map(|target| Reference::new(*target, &file, 1, 0).with_consumer(Some(name.to_string())))
            .collect();
        let definitions = vec![Definition::new(name, DefinitionKind::View, &file, 1)];
        graph.apply_file_result(Path::new(&file), &references, &definitions);
    }

    #[test]
    fn test_no_cycles() {
        let mut graph = DependencyGraph::new();
        view(&mut graph, "b", &["a"]);
        view(&mut graph, "c", &["b"]);
        assert!(graph.detect_circular_dependencies().is_empty());
    }

    #[test]
    fn test_cycle_reported_once_in_canonical_rotation() {
        let mut graph = DependencyGraph::new();
        view(&mut graph, "c", &["b"]);
        view(&mut graph, "b", &["a"]);
        view(&mut graph, "a", &["c"]);

        let cycles = graph.detect_circular_dependencies();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].nodes, vec![NodeId::object("a"), NodeId::object("c"), NodeId::object("b")]);
        assert_eq!(cycles[0].path(), "a -> c -> b -> a");
    }

    #[test]
    fn test_overlapping_cycles_are_all_reported() {
        let mut graph = DependencyGraph::new();
        view(&mut graph, "a", &["b", "c"]);
        view(&mut graph, "b", &["c"]);
        view(&mut graph, "c", &["a"]);

        let paths: Vec<String> = graph.detect_circular_dependencies().iter().map(Cycle::path).collect();
        assert_eq!(paths, vec!["a -> b -> c -> a".to_string(), "a -> c -> a".to_string()]);
    }

    #[test]
    fn test_cycles_behind_an_acyclic_prefix() {
        let mut graph = DependencyGraph::new();
        view(&mut graph, "entry", &["x"]);
        view(&mut graph, "x", &["y"]);
        view(&mut graph, "y", &["x", "z"]);
        view(&mut graph, "z", &["y"]);

        let paths: Vec<String> = graph.detect_circular_dependencies().iter().map(Cycle::path).collect();
        assert_eq!(paths, vec!["x -> y -> x".to_string(), "y -> z -> y".to_string()]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        view(&mut graph, "loop", &["loop"]);

        let cycles = graph.detect_circular_dependencies();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains(&NodeId::object("loop")));

        let diagnostic = cycles[0].to_diagnostic();
        assert_eq!(diagnostic.code, DiagnosticCode::CircularDependency);
        assert_eq!(diagnostic.impact, vec!["loop".to_string()]);
    }
}
