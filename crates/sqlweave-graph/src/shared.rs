//! Shared graph handle
//!
//! One writer applies file results while any number of readers query. Each
//! mutation holds the write lock for its whole duration, so readers see
//! either the old or the new contribution of a file.

use crate::cycles::Cycle;
use crate::dag::{DependencyGraph, GraphSnapshot};
use sqlweave_core::{Definition, Reference};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Default)]
pub struct SharedGraph {
    inner: Arc<RwLock<DependencyGraph>>,
}

impl SharedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_graph(graph: DependencyGraph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
        }
    }

    /// Run a query under the read lock
    pub fn read<R>(&self, query: impl FnOnce(&DependencyGraph) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        query(&*guard)
    }

    /// Run a mutation under the write lock
    pub fn write<R>(&self, mutation: impl FnOnce(&mut DependencyGraph) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        mutation(&mut *guard)
    }

    pub fn apply_file_result(&self, path: &Path, references: &[Reference], definitions: &[Definition]) {
        self.write(|graph| graph.apply_file_result(path, references, definitions));
    }

    pub fn remove_file(&self, path: &Path) {
        self.write(|graph| graph.remove_file(path));
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.read(DependencyGraph::snapshot)
    }

    pub fn detect_circular_dependencies(&self) -> Vec<Cycle> {
        self.read(DependencyGraph::detect_circular_dependencies)
    }
}
