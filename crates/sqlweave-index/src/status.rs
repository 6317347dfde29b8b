//! Per-file processing status and deduplicated status reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlweave_core::{Diagnostic, DiagnosticCode, Location, ParseStatus, Severity};
use sqlweave_graph::Edge;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Position of a path in the update pipeline
///
/// `queued -> verifying -> (indexing | removed) -> done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Queued,
    Verifying,
    Indexing,
    Removed,
    Done,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Verifying => write!(f, "verifying"),
            Self::Indexing => write!(f, "indexing"),
            Self::Removed => write!(f, "removed"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Latest known status of a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub path: PathBuf,
    pub state: QueueState,

    /// Outcome of the last extraction, if the file was indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_status: Option<ParseStatus>,

    /// Error from the last attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl FileStatus {
    fn new(path: &Path, state: QueueState) -> Self {
        Self {
            path: path.to_path_buf(),
            state,
            parse_status: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// A change in the diagnostics published for a path
///
/// An empty list clears whatever was previously reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub path: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

/// Diagnostic for a reference to an object no workspace file defines
pub(crate) fn missing_definition(edge: &Edge) -> Diagnostic {
    let name = edge.to.name();
    Diagnostic::new(
        DiagnosticCode::MissingDefinition,
        Severity::Info,
        format!("'{}' is not defined in the workspace", name),
    )
    .with_location(Location::with_line(edge.file.display().to_string(), edge.line))
    .with_impact(vec![name])
}

/// Status table plus the outbox of diagnostics not yet taken by the host
///
/// Each path carries the diagnostic of its last attempt. The status pass
/// after a batch adds the workspace-level ones (missing definitions) and
/// queues a report only when the combined list differs from the last one
/// published, so a file that keeps failing the same way is reported once.
#[derive(Debug, Default)]
pub(crate) struct StatusBoard {
    statuses: HashMap<PathBuf, FileStatus>,
    attempts: HashMap<PathBuf, Diagnostic>,
    published: HashMap<PathBuf, Vec<Diagnostic>>,
    outbox: Vec<StatusReport>,
}

impl StatusBoard {
    pub fn set_state(&mut self, path: &Path, state: QueueState) {
        let status = self
            .statuses
            .entry(path.to_path_buf())
            .or_insert_with(|| FileStatus::new(path, state));
        status.state = state;
        status.updated_at = Utc::now();
    }

    /// Finish a path with the outcome of its last attempt
    pub fn finish(&mut self, path: &Path, parse_status: Option<ParseStatus>, diagnostic: Option<Diagnostic>) {
        let status = self
            .statuses
            .entry(path.to_path_buf())
            .or_insert_with(|| FileStatus::new(path, QueueState::Done));
        status.state = QueueState::Done;
        status.updated_at = Utc::now();
        if parse_status.is_some() {
            status.parse_status = parse_status;
        }
        status.error = diagnostic
            .as_ref()
            .filter(|d| d.severity == Severity::Error)
            .map(|d| d.message.clone());

        if let Some(diagnostic) = diagnostic {
            self.attempts.insert(path.to_path_buf(), diagnostic);
        } else {
            self.attempts.remove(path);
        }
    }

    /// Mark a path removed; its status entry is kept so callers can observe it
    pub fn remove(&mut self, path: &Path) {
        self.set_state(path, QueueState::Removed);
        if let Some(status) = self.statuses.get_mut(path) {
            status.parse_status = None;
            status.error = None;
        }
        self.attempts.remove(path);
        self.publish(path, Vec::new());
    }

    /// Combine the last attempt's diagnostic with `workspace` diagnostics
    /// and queue a report when the result changed
    pub fn publish(&mut self, path: &Path, workspace: Vec<Diagnostic>) {
        let diagnostics: Vec<Diagnostic> = self.attempts.get(path).cloned().into_iter().chain(workspace).collect();

        let previous = self.published.get(path).map(Vec::as_slice).unwrap_or_default();
        if previous == diagnostics.as_slice() {
            return;
        }

        if diagnostics.is_empty() {
            self.published.remove(path);
        } else {
            self.published.insert(path.to_path_buf(), diagnostics.clone());
        }
        self.outbox.push(StatusReport {
            path: path.to_path_buf(),
            diagnostics,
        });
    }

    /// Diagnostics currently published for a path
    pub fn published(&self, path: &Path) -> &[Diagnostic] {
        self.published.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn get(&self, path: &Path) -> Option<FileStatus> {
        self.statuses.get(path).cloned()
    }

    pub fn take_reports(&mut self) -> Vec<StatusReport> {
        std::mem::take(&mut self.outbox)
    }
}
