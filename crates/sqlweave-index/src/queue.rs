//! Update queue with per-path coalescing

use crate::scan::ParsedFile;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// What happened to a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
    Renamed { from: PathBuf },
}

/// A file change reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,

    /// In-memory content (unsaved editor buffers); read from disk when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl FileEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Created)
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Modified)
    }

    pub fn deleted(path: impl Into<PathBuf>) -> Self {
        Self::new(path, FileEventKind::Deleted)
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self::new(to, FileEventKind::Renamed { from: from.into() })
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
            content: None,
        }
    }
}

/// What to do with a path when it is dequeued
#[derive(Debug)]
pub enum Work {
    /// Index the supplied content, or read the file when there is none
    Index { content: Option<String> },

    /// Apply a result parsed ahead of time by a scan
    Parsed(Box<ParsedFile>),

    /// Drop the path's contribution without looking at disk
    Remove,
}

/// A dequeued unit of work
#[derive(Debug)]
pub struct QueueItem {
    pub path: PathBuf,
    pub work: Work,
}

/// FIFO of paths where a repeated enqueue replaces the pending item in place
///
/// Every push bumps the path's generation. A scan snapshots the generations
/// before it reads anything and hands its results back with
/// [`push_scanned`](Self::push_scanned), which drops any result for a path
/// pushed since the snapshot.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    order: VecDeque<PathBuf>,
    pending: HashMap<PathBuf, Work>,
    generations: HashMap<PathBuf, u64>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event; renames become a removal of the old path plus an
    /// index of the new one
    pub fn push_event(&mut self, event: FileEvent) {
        match event.kind {
            FileEventKind::Renamed { from } => {
                self.push(from, None);
                self.push(event.path, event.content);
            }
            FileEventKind::Deleted => self.push(event.path, None),
            FileEventKind::Created | FileEventKind::Modified => self.push(event.path, event.content),
        }
    }

    /// Queue a path; a path already waiting keeps its position and takes the
    /// new content
    pub fn push(&mut self, path: PathBuf, content: Option<String>) {
        *self.generations.entry(path.clone()).or_default() += 1;
        self.put(path, Work::Index { content });
    }

    /// Current generation of every path pushed so far
    pub fn generations(&self) -> HashMap<PathBuf, u64> {
        self.generations.clone()
    }

    /// Queue scan work for a path last seen at `generation`
    ///
    /// Returns false, queueing nothing, when the path is waiting or was
    /// pushed after the snapshot.
    pub fn push_scanned(&mut self, path: PathBuf, generation: u64, work: Work) -> bool {
        let current = self.generations.get(&path).copied().unwrap_or(0);
        if current != generation || self.pending.contains_key(&path) {
            return false;
        }
        self.put(path, work);
        true
    }

    fn put(&mut self, path: PathBuf, work: Work) {
        if let Some(slot) = self.pending.get_mut(&path) {
            *slot = work;
            return;
        }
        self.order.push_back(path.clone());
        self.pending.insert(path, work);
    }

    pub fn pop(&mut self) -> Option<QueueItem> {
        let path = self.order.pop_front()?;
        let work = self.pending.remove(&path).unwrap_or(Work::Index { content: None });
        Some(QueueItem { path, work })
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
