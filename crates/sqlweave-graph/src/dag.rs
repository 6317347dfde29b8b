//! Dependency graph
//!
//! Nodes are database objects (tables and views) and SQL files. Edges point
//! from a consumer to what it reads (`references`) or from a file to the
//! object it creates (`defines`). Every edge carries the file it came from,
//! and a file's contribution is always swapped as a whole.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut graph = DependencyGraph::new();
//! graph.apply_file_result(path, &extraction.references, &extraction.definitions);
//!
//! let readers = graph.neighbors(&NodeId::object("orders"), Direction::Downstream);
//! ```

use serde::{Deserialize, Serialize};
use sqlweave_core::{
    is_qualified, last_segment, normalize_name, Definition, DefinitionKind, Diagnostic, DiagnosticCode,
    Reference, Severity,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors from graph consistency checks
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph inconsistency: {0}")]
    Inconsistency(String),
}

impl GraphError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(DiagnosticCode::GraphInconsistency, Severity::Error, self.to_string())
    }
}

/// Node identity
///
/// Objects and files live in separate namespaces, so a file named `orders`
/// never collides with a table named `orders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum NodeId {
    Object(String),
    File(PathBuf),
}

impl NodeId {
    /// Object node for a (not necessarily normalized) name
    pub fn object(name: &str) -> Self {
        Self::Object(normalize_name(name))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Display name used for ordering and output
    pub fn name(&self) -> String {
        match self {
            Self::Object(name) => name.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(name) => write!(f, "{}", name),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Kind of node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Table,
    View,
    File,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::File => write!(f, "file"),
        }
    }
}

/// Read-only view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,

    /// Normalized object name, or the file path
    pub name: String,

    pub kind: NodeKind,

    /// Files defining this object (sorted)
    pub defined_in: Vec<PathBuf>,

    /// Files referencing this object (sorted)
    pub referenced_in: Vec<PathBuf>,

    /// Referenced but never defined anywhere in the workspace
    pub missing_definition: bool,
}

/// Edge type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    References,
    Defines,
}

/// A directed edge with provenance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,

    /// File whose contribution produced this edge
    pub file: PathBuf,

    /// Line in `file` (1-indexed)
    pub line: usize,
}

/// Traversal direction over `references` edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// What a node reads
    Upstream,

    /// Who reads a node
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => write!(f, "upstream"),
            Self::Downstream => write!(f, "downstream"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upstream" | "up" => Ok(Self::Upstream),
            "downstream" | "down" => Ok(Self::Downstream),
            other => Err(format!("Unknown direction '{}'", other)),
        }
    }
}

/// Serializable copy of the whole graph, sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

type EdgeId = u64;

#[derive(Debug, Clone)]
struct StoredEdge {
    edge: Edge,
    /// Consumer name as extracted, when the consumer is an object
    raw_from: Option<String>,
    /// Target name as extracted
    raw_to: String,
}

impl StoredEdge {
    /// Last segments of the raw names, which decide how the edge links
    fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(last_segment(&self.raw_to)).chain(self.raw_from.as_deref().map(last_segment))
    }
}

/// The dependency graph
///
/// All mutation goes through [`apply_file_result`](Self::apply_file_result)
/// and [`remove_file`](Self::remove_file).
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<EdgeId, StoredEdge>,
    outgoing: HashMap<NodeId, BTreeSet<EdgeId>>,
    incoming: HashMap<NodeId, BTreeSet<EdgeId>>,
    by_file: HashMap<PathBuf, BTreeSet<EdgeId>>,
    nodes: BTreeSet<NodeId>,

    /// Defined object name -> defining files
    definitions: BTreeMap<String, BTreeMap<PathBuf, DefinitionKind>>,

    /// Last name segment -> defined names ending in it
    segments: HashMap<String, BTreeSet<String>>,

    /// File -> names it defines
    defined_by_file: HashMap<PathBuf, BTreeSet<String>>,

    /// Last segment of an edge's raw endpoint names -> edges
    by_segment: HashMap<String, BTreeSet<EdgeId>>,

    next_edge: EdgeId,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contribution of `path` with a new extraction result
    ///
    /// Edges previously provenanced to `path` are removed, the new
    /// definitions are recorded, edges of other files whose targets resolve
    /// differently after the definition change are relinked, the new edges
    /// are added and orphaned nodes are pruned.
    pub fn apply_file_result(&mut self, path: &Path, references: &[Reference], definitions: &[Definition]) {
        let mut touched = BTreeSet::new();

        self.detach_file(path, &mut touched);
        let changed = self.set_definitions(path, definitions);
        self.relink(&changed, &mut touched);

        let file_node = NodeId::File(path.to_path_buf());

        let mut seen = HashSet::new();
        for definition in definitions.iter().filter(|d| d.kind != DefinitionKind::Cte) {
            let name = definition.normalized_name();
            if name.is_empty() || !seen.insert(name.clone()) {
                continue;
            }
            let edge = Edge {
                from: file_node.clone(),
                to: NodeId::Object(name.clone()),
                kind: EdgeKind::Defines,
                file: path.to_path_buf(),
                line: definition.line,
            };
            self.insert(StoredEdge { edge, raw_from: None, raw_to: name }, &mut touched);
        }

        for reference in references {
            let raw_to = reference.normalized_name();
            if raw_to.is_empty() {
                continue;
            }
            let raw_from = reference
                .consumer
                .as_deref()
                .map(normalize_name)
                .filter(|name| !name.is_empty());
            let from = match &raw_from {
                Some(consumer) => NodeId::Object(self.resolve(consumer)),
                None => file_node.clone(),
            };
            let edge = Edge {
                from,
                to: NodeId::Object(self.resolve(&raw_to)),
                kind: EdgeKind::References,
                file: path.to_path_buf(),
                line: reference.line,
            };
            self.insert(StoredEdge { edge, raw_from, raw_to }, &mut touched);
        }

        self.prune(&touched);

        debug!(
            file = %path.display(),
            references = references.len(),
            definitions = definitions.len(),
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "Applied file result"
        );
        debug_assert!(self.check_invariants().is_ok(), "{:?}", self.check_invariants());
    }

    /// Remove every edge and definition contributed by `path`
    pub fn remove_file(&mut self, path: &Path) {
        self.apply_file_result(path, &[], &[]);
    }

    /// Nodes adjacent over `references` edges, sorted and deduplicated
    pub fn neighbors(&self, node: &NodeId, direction: Direction) -> Vec<NodeId> {
        let neighbors: BTreeSet<NodeId> = self
            .reference_edges(node, direction)
            .into_iter()
            .map(|edge| match direction {
                Direction::Upstream => edge.to,
                Direction::Downstream => edge.from,
            })
            .collect();
        neighbors.into_iter().collect()
    }

    /// `references` edges leaving (upstream) or entering (downstream) a node,
    /// sorted by file then line
    pub fn reference_edges(&self, node: &NodeId, direction: Direction) -> Vec<Edge> {
        let index = match direction {
            Direction::Upstream => &self.outgoing,
            Direction::Downstream => &self.incoming,
        };

        let mut edges: Vec<Edge> = index
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .filter(|stored| stored.edge.kind == EdgeKind::References)
            .map(|stored| stored.edge.clone())
            .collect();
        edges.sort_by(|a, b| (&a.file, a.line, &a.from, &a.to).cmp(&(&b.file, b.line, &b.from, &b.to)));
        edges
    }

    /// Look up a node by user-supplied name
    ///
    /// Object names go through the same linking rules as references, so an
    /// unqualified name finds its single qualified definition. A `file:`
    /// prefix or a plain path finds a file node.
    pub fn find_node(&self, name: &str) -> Option<Node> {
        let trimmed = name.trim();
        if let Some(path) = trimmed.strip_prefix("file:") {
            return self.node(&NodeId::File(PathBuf::from(path)));
        }

        let normalized = normalize_name(trimmed);
        if !normalized.is_empty() {
            if let Some(node) = self.node(&NodeId::Object(self.resolve(&normalized))) {
                return Some(node);
            }
        }
        self.node(&NodeId::File(PathBuf::from(trimmed)))
    }

    /// View of a node, if it exists
    pub fn node(&self, id: &NodeId) -> Option<Node> {
        if !self.nodes.contains(id) {
            return None;
        }

        let node = match id {
            NodeId::File(path) => Node {
                id: id.clone(),
                name: path.display().to_string(),
                kind: NodeKind::File,
                defined_in: Vec::new(),
                referenced_in: Vec::new(),
                missing_definition: false,
            },
            NodeId::Object(name) => {
                let definitions = self.definitions.get(name);
                let kind = match definitions {
                    Some(files) if files.values().any(|kind| *kind == DefinitionKind::View) => NodeKind::View,
                    _ => NodeKind::Table,
                };
                let referenced_in: BTreeSet<PathBuf> = self
                    .reference_edges(id, Direction::Downstream)
                    .into_iter()
                    .map(|edge| edge.file)
                    .collect();

                Node {
                    id: id.clone(),
                    name: name.clone(),
                    kind,
                    defined_in: definitions.map(|files| files.keys().cloned().collect()).unwrap_or_default(),
                    referenced_in: referenced_in.into_iter().collect(),
                    missing_definition: definitions.is_none(),
                }
            }
        };
        Some(node)
    }

    /// Every node, sorted by name
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().filter_map(|id| self.node(id)).collect();
        nodes.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
        nodes
    }

    /// Edges provenanced to `path`, sorted by line
    pub fn edges_for_file(&self, path: &Path) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .by_file
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .map(|stored| stored.edge.clone())
            .collect();
        edges.sort_by(|a, b| (a.line, a.kind, &a.from, &a.to).cmp(&(b.line, b.kind, &b.from, &b.to)));
        edges
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut edges: Vec<Edge> = self.edges.values().map(|stored| stored.edge.clone()).collect();
        edges.sort();
        GraphSnapshot {
            nodes: self.all_nodes(),
            edges,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `references` edges whose target has no definition, sorted by file
    /// then line
    pub fn unresolved_references(&self) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .edges
            .values()
            .map(|stored| &stored.edge)
            .filter(|edge| edge.kind == EdgeKind::References)
            .filter(|edge| matches!(&edge.to, NodeId::Object(name) if !self.definitions.contains_key(name)))
            .cloned()
            .collect();
        edges.sort_by(|a, b| (&a.file, a.line, &a.to, &a.from).cmp(&(&b.file, b.line, &b.to, &b.from)));
        edges
    }

    /// Whether an object name has at least one definition
    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(&normalize_name(name))
    }

    /// Verify index consistency
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for (id, stored) in &self.edges {
            let edge = &stored.edge;
            for endpoint in [&edge.from, &edge.to] {
                if !self.nodes.contains(endpoint) {
                    return Err(GraphError::Inconsistency(format!(
                        "edge {} -> {} has dangling endpoint {}",
                        edge.from, edge.to, endpoint
                    )));
                }
            }

            let indexed = self.outgoing.get(&edge.from).is_some_and(|ids| ids.contains(id))
                && self.incoming.get(&edge.to).is_some_and(|ids| ids.contains(id))
                && self.by_file.get(&edge.file).is_some_and(|ids| ids.contains(id));
            if !indexed {
                return Err(GraphError::Inconsistency(format!(
                    "edge {} -> {} is missing from an index",
                    edge.from, edge.to
                )));
            }
        }

        for (id, stored) in &self.edges {
            let segmented = stored
                .segments()
                .all(|segment| self.by_segment.get(segment).is_some_and(|ids| ids.contains(id)));
            if !segmented {
                return Err(GraphError::Inconsistency(format!(
                    "edge {} -> {} is missing from the segment index",
                    stored.edge.from, stored.edge.to
                )));
            }
        }

        let indexes = self
            .outgoing
            .values()
            .chain(self.incoming.values())
            .chain(self.by_file.values())
            .chain(self.by_segment.values());
        for ids in indexes {
            if ids.is_empty() || ids.iter().any(|id| !self.edges.contains_key(id)) {
                return Err(GraphError::Inconsistency("index holds a stale edge".to_string()));
            }
        }

        for node in &self.nodes {
            if !self.outgoing.contains_key(node) && !self.incoming.contains_key(node) {
                return Err(GraphError::Inconsistency(format!("node {} has no edges", node)));
            }
        }

        Ok(())
    }

    /// Resolve an extracted name to the node it links to
    ///
    /// A defined name is itself. An undefined unqualified name links to the
    /// single qualified definition sharing its last segment. An undefined
    /// qualified name links to the unqualified definition of its last
    /// segment when no qualified definition shares that segment. Anything
    /// else stays as written and becomes a missing-definition node.
    fn resolve(&self, raw: &str) -> String {
        if self.definitions.contains_key(raw) {
            return raw.to_string();
        }

        let segment = last_segment(raw);
        let Some(defined) = self.segments.get(segment) else {
            return raw.to_string();
        };

        let mut qualified = defined.iter().filter(|name| is_qualified(name));
        if is_qualified(raw) {
            if defined.contains(segment) && qualified.next().is_none() {
                return segment.to_string();
            }
        } else if let (Some(only), None) = (qualified.next(), qualified.next()) {
            return only.clone();
        }

        raw.to_string()
    }

    fn detach_file(&mut self, path: &Path, touched: &mut BTreeSet<NodeId>) {
        let ids: Vec<EdgeId> = self.by_file.get(path).into_iter().flatten().copied().collect();
        for id in ids {
            self.detach_edge(id, touched);
        }
    }

    /// Record the definitions of `path` and return the names whose
    /// defined/undefined status flipped
    fn set_definitions(&mut self, path: &Path, definitions: &[Definition]) -> BTreeSet<String> {
        let old = self.defined_by_file.remove(path).unwrap_or_default();

        let mut new: BTreeMap<String, DefinitionKind> = BTreeMap::new();
        for definition in definitions.iter().filter(|d| d.kind != DefinitionKind::Cte) {
            let name = definition.normalized_name();
            if name.is_empty() {
                continue;
            }
            new.entry(name)
                .and_modify(|kind| {
                    if definition.kind == DefinitionKind::View {
                        *kind = DefinitionKind::View;
                    }
                })
                .or_insert(definition.kind);
        }

        let candidates: BTreeSet<String> = old.iter().chain(new.keys()).cloned().collect();
        let before: BTreeSet<String> = candidates
            .iter()
            .filter(|name| self.definitions.contains_key(*name))
            .cloned()
            .collect();

        for name in &old {
            if let Some(files) = self.definitions.get_mut(name) {
                files.remove(path);
                if files.is_empty() {
                    self.definitions.remove(name);
                    let segment = last_segment(name).to_string();
                    if let Some(names) = self.segments.get_mut(&segment) {
                        names.remove(name);
                        if names.is_empty() {
                            self.segments.remove(&segment);
                        }
                    }
                }
            }
        }

        for (name, kind) in &new {
            self.definitions
                .entry(name.clone())
                .or_default()
                .insert(path.to_path_buf(), *kind);
            self.segments
                .entry(last_segment(name).to_string())
                .or_default()
                .insert(name.clone());
        }

        if !new.is_empty() {
            self.defined_by_file
                .insert(path.to_path_buf(), new.into_keys().collect());
        }

        candidates
            .into_iter()
            .filter(|name| before.contains(name) != self.definitions.contains_key(name))
            .collect()
    }

    /// Re-resolve edges whose endpoints may link differently now that the
    /// definitions of `changed` flipped
    fn relink(&mut self, changed: &BTreeSet<String>, touched: &mut BTreeSet<NodeId>) {
        if changed.is_empty() {
            return;
        }

        let affected: BTreeSet<EdgeId> = changed
            .iter()
            .filter_map(|name| self.by_segment.get(last_segment(name)))
            .flatten()
            .copied()
            .collect();

        for id in affected {
            let Some(stored) = self.edges.get(&id) else {
                continue;
            };
            let to = match stored.edge.kind {
                EdgeKind::Defines => stored.edge.to.clone(),
                EdgeKind::References => NodeId::Object(self.resolve(&stored.raw_to)),
            };
            let from = match &stored.raw_from {
                Some(raw) => NodeId::Object(self.resolve(raw)),
                None => stored.edge.from.clone(),
            };
            if to == stored.edge.to && from == stored.edge.from {
                continue;
            }

            debug!(from = %from, to = %to, "Relinking edge");
            if let Some(mut stored) = self.detach_edge(id, touched) {
                stored.edge.from = from;
                stored.edge.to = to;
                self.attach_edge(id, stored, touched);
            }
        }
    }

    fn insert(&mut self, stored: StoredEdge, touched: &mut BTreeSet<NodeId>) {
        let id = self.next_edge;
        self.next_edge += 1;
        self.attach_edge(id, stored, touched);
    }

    fn attach_edge(&mut self, id: EdgeId, stored: StoredEdge, touched: &mut BTreeSet<NodeId>) {
        let edge = &stored.edge;
        self.nodes.insert(edge.from.clone());
        self.nodes.insert(edge.to.clone());
        self.outgoing.entry(edge.from.clone()).or_default().insert(id);
        self.incoming.entry(edge.to.clone()).or_default().insert(id);
        self.by_file.entry(edge.file.clone()).or_default().insert(id);
        for segment in stored.segments() {
            self.by_segment.entry(segment.to_string()).or_default().insert(id);
        }
        touched.insert(edge.from.clone());
        touched.insert(edge.to.clone());
        self.edges.insert(id, stored);
    }

    fn detach_edge(&mut self, id: EdgeId, touched: &mut BTreeSet<NodeId>) -> Option<StoredEdge> {
        let stored = self.edges.remove(&id)?;
        Self::unindex(&mut self.outgoing, &stored.edge.from, id);
        Self::unindex(&mut self.incoming, &stored.edge.to, id);
        Self::unindex(&mut self.by_file, &stored.edge.file, id);
        for segment in stored.segments() {
            Self::unindex(&mut self.by_segment, &segment.to_string(), id);
        }
        touched.insert(stored.edge.from.clone());
        touched.insert(stored.edge.to.clone());
        Some(stored)
    }

    fn unindex<K: std::hash::Hash + Eq>(index: &mut HashMap<K, BTreeSet<EdgeId>>, key: &K, id: EdgeId) {
        if let Some(ids) = index.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                index.remove(key);
            }
        }
    }

    fn prune(&mut self, touched: &BTreeSet<NodeId>) {
        for node in touched {
            if !self.outgoing.contains_key(node) && !self.incoming.contains_key(node) {
                self.nodes.remove(node);
            }
        }
    }
}
