//! Dependency graph and lineage
//!
//! This crate handles:
//! - The object/file dependency graph, mutated one file at a time
//! - Qualified/unqualified name linking
//! - Shared read/write access for concurrent readers
//! - Cycle detection and lineage traversal

pub mod cycles;
pub mod dag;
pub mod lineage;
pub mod shared;

pub use cycles::Cycle;
pub use dag::{DependencyGraph, Direction, Edge, EdgeKind, GraphError, GraphSnapshot, Node, NodeId, NodeKind};
pub use lineage::{Lineage, LineageAnalyzer, LineageStep, DEFAULT_MAX_DEPTH};
pub use shared::SharedGraph;
