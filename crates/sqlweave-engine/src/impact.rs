//! Change impact analysis
//!
//! Answers "what breaks, and how badly, if this object changes?" by walking
//! the graph downstream from the target and classifying every consumer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let analyzer = ImpactAnalyzer::new(&graph).with_max_depth(config.analysis.max_depth);
//! let report = analyzer.analyze(&NodeId::object("orders"), ChangeType::Drop);
//! println!("{} ({} direct)", report.severity, report.direct_impacts.len());
//! ```

use crate::severity::{assess, Distance, ImpactSeverity};
use serde::{Deserialize, Serialize};
use sqlweave_graph::{
    Cycle, DependencyGraph, Direction, LineageAnalyzer, LineageStep, Node, NodeId, NodeKind, DEFAULT_MAX_DEPTH,
};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

/// Kind of change being assessed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Object is removed
    Drop,

    /// Object is renamed
    Rename,

    /// Object's columns or structure change
    Alter,

    /// Object's contents or logic change
    Modify,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => write!(f, "drop"),
            Self::Rename => write!(f, "rename"),
            Self::Alter => write!(f, "alter"),
            Self::Modify => write!(f, "modify"),
        }
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "rename" => Ok(Self::Rename),
            "alter" => Ok(Self::Alter),
            "modify" => Ok(Self::Modify),
            other => Err(format!("Unknown change type '{}' (expected drop, rename, alter or modify)", other)),
        }
    }
}

/// One affected consumer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    pub node: NodeId,
    pub name: String,
    pub kind: NodeKind,

    /// Hops from the target
    pub depth: usize,

    pub severity: ImpactSeverity,
    pub reason: String,

    /// Consumer has no definition in the workspace
    pub missing_definition: bool,

    /// File and line of the edge through which the consumer was reached
    pub file: PathBuf,
    pub line: usize,
}

/// Counts of affected consumers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub tables_affected: usize,
    pub views_affected: usize,

    /// File nodes (standalone queries)
    pub queries_affected: usize,

    /// Distinct files the impact edges come from
    pub files_affected: usize,
}

impl ImpactSummary {
    fn from_impacts<'a>(impacts: impl Iterator<Item = &'a Impact>) -> Self {
        let mut summary = Self::default();
        let mut files = BTreeSet::new();
        for impact in impacts {
            match impact.kind {
                NodeKind::Table => summary.tables_affected += 1,
                NodeKind::View => summary.views_affected += 1,
                NodeKind::File => summary.queries_affected += 1,
            }
            files.insert(impact.file.clone());
        }
        summary.files_affected = files.len();
        summary
    }

    pub fn total(&self) -> usize {
        self.tables_affected + self.views_affected + self.queries_affected
    }
}

/// Result of an impact analysis
///
/// Computed on request and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub target: Node,
    pub change: ChangeType,

    /// Highest severity across all impacts
    pub severity: ImpactSeverity,

    pub direct_impacts: Vec<Impact>,
    pub transitive_impacts: Vec<Impact>,
    pub suggestions: Vec<String>,
    pub summary: ImpactSummary,

    /// Cycles passing through the target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<Cycle>,
}

impl ImpactReport {
    pub fn impacts(&self) -> impl Iterator<Item = &Impact> {
        self.direct_impacts.iter().chain(self.transitive_impacts.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.direct_impacts.is_empty() && self.transitive_impacts.is_empty()
    }
}

/// Impact analysis over a borrowed graph
pub struct ImpactAnalyzer<'a> {
    graph: &'a DependencyGraph,
    max_depth: usize,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self {
            graph,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Bound the transitive walk (`analysis.max_depth`)
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Analyze a change to a user-supplied node name
    pub fn analyze_name(&self, name: &str, change: ChangeType) -> Option<ImpactReport> {
        let target = self.graph.find_node(name)?;
        Some(self.report(target, change))
    }

    /// Analyze a change to `target`
    ///
    /// A target missing from the graph yields an empty report with severity
    /// `none`.
    pub fn analyze(&self, target: &NodeId, change: ChangeType) -> ImpactReport {
        let node = self.graph.node(target).unwrap_or_else(|| Node {
            id: target.clone(),
            name: target.name(),
            kind: if target.is_file() { NodeKind::File } else { NodeKind::Table },
            defined_in: Vec::new(),
            referenced_in: Vec::new(),
            missing_definition: !target.is_file(),
        });
        self.report(node, change)
    }

    fn report(&self, target: Node, change: ChangeType) -> ImpactReport {
        let steps = LineageAnalyzer::new(self.graph).trace(&target.id, Direction::Downstream, self.max_depth);

        let (direct, transitive): (Vec<Impact>, Vec<Impact>) = steps
            .into_iter()
            .map(|step| Self::impact(&target, change, step))
            .partition(|impact| impact.depth == 1);

        let severity = direct
            .iter()
            .chain(transitive.iter())
            .map(|impact| impact.severity)
            .max()
            .unwrap_or(ImpactSeverity::None);

        let cycles: Vec<Cycle> = self
            .graph
            .detect_circular_dependencies()
            .into_iter()
            .filter(|cycle| cycle.contains(&target.id))
            .collect();

        let summary = ImpactSummary::from_impacts(direct.iter().chain(transitive.iter()));
        let suggestions = suggestions(&target, change, &direct, &transitive, &cycles);

        debug!(
            target = %target.id,
            change = %change,
            severity = %severity,
            direct = direct.len(),
            transitive = transitive.len(),
            "Analyzed impact"
        );

        ImpactReport {
            target,
            change,
            severity,
            direct_impacts: direct,
            transitive_impacts: transitive,
            suggestions,
            summary,
            cycles,
        }
    }

    fn impact(target: &Node, change: ChangeType, step: LineageStep) -> Impact {
        let LineageStep { node, depth, via } = step;
        let distance = Distance::from_depth(depth);
        let severity = assess(change, distance, node.kind, node.missing_definition);

        let source = match distance {
            Distance::Direct => format!("reads `{}` directly", target.name),
            Distance::Transitive => format!("reads `{}` through `{}`", target.name, via.to.name()),
        };
        let consequence = match change {
            ChangeType::Drop => "fails once it is dropped",
            ChangeType::Rename => "breaks until its reference is updated",
            ChangeType::Alter => "may break on changed columns",
            ChangeType::Modify => "may return different results",
        };
        let mut reason = format!("{} and {}", source, consequence);
        if node.missing_definition {
            reason.push_str(" (no definition in workspace)");
        }

        Impact {
            name: node.name,
            node: node.id,
            kind: node.kind,
            depth,
            severity,
            reason,
            missing_definition: node.missing_definition,
            file: via.file,
            line: via.line,
        }
    }
}

fn suggestions(target: &Node, change: ChangeType, direct: &[Impact], transitive: &[Impact], cycles: &[Cycle]) -> Vec<String> {
    let mut suggestions = Vec::new();
    let total = direct.len() + transitive.len();
    let name = &target.name;

    match change {
        ChangeType::Drop if total > 0 => suggestions.push(format!(
            "Remove or rewrite {} downstream consumer(s) of `{}` before dropping it",
            total, name
        )),
        ChangeType::Drop => suggestions.push(format!("No indexed consumers read `{}`; dropping it is safe", name)),
        ChangeType::Rename if total > 0 => {
            suggestions.push(format!("Update {} downstream references to `{}`", total, name));
            suggestions.push("Consider leaving a compatibility view under the old name".to_string());
        }
        ChangeType::Rename => suggestions.push(format!("No indexed consumers reference `{}`", name)),
        ChangeType::Alter if !direct.is_empty() => suggestions.push(format!(
            "Check column usage in {} direct consumer(s) of `{}`",
            direct.len(),
            name
        )),
        ChangeType::Modify if total > 0 => {
            suggestions.push(format!("Re-validate results of {} downstream consumer(s)", total))
        }
        ChangeType::Alter | ChangeType::Modify => {}
    }

    for cycle in cycles {
        suggestions.push(format!(
            "`{}` is part of a circular dependency ({}); break the cycle before changing it",
            name,
            cycle.path()
        ));
    }

    let missing: Vec<&str> = direct
        .iter()
        .chain(transitive.iter())
        .filter(|impact| impact.missing_definition)
        .map(|impact| impact.name.as_str())
        .collect();
    if !missing.is_empty() {
        suggestions.push(format!(
            "Add definitions for consumers missing from the workspace: {}",
            missing.join(", ")
        ));
    }

    suggestions
}
