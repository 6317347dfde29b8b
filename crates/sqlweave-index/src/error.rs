//! Indexing errors

use sqlweave_core::{ConfigError, Diagnostic, DiagnosticCode, Location, Severity};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Category of an indexing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexErrorKind {
    /// The file vanished between enqueue and processing
    FileUnavailable,

    /// The file exists but could not be read
    Io,

    /// Configuration could not be turned into an extractor or file filter
    Config,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct IndexError {
    pub kind: IndexErrorKind,
    pub path: Option<PathBuf>,
    pub message: String,
}

impl IndexError {
    pub fn io(path: &Path, error: &std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => IndexErrorKind::FileUnavailable,
            _ => IndexErrorKind::Io,
        };
        Self {
            kind,
            path: Some(path.to_path_buf()),
            message: format!("Failed to read {}: {}", path.display(), error),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.kind == IndexErrorKind::FileUnavailable
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let (code, severity) = match self.kind {
            IndexErrorKind::FileUnavailable => (DiagnosticCode::FileUnavailable, Severity::Info),
            IndexErrorKind::Io => (DiagnosticCode::IoFailure, Severity::Error),
            IndexErrorKind::Config => (DiagnosticCode::ConfigInvalid, Severity::Error),
        };
        let diagnostic = Diagnostic::new(code, severity, self.message.clone());
        match &self.path {
            Some(path) => diagnostic.with_location(Location::new(path.display().to_string())),
            None => diagnostic,
        }
    }
}

impl From<ConfigError> for IndexError {
    fn from(error: ConfigError) -> Self {
        Self {
            kind: IndexErrorKind::Config,
            path: None,
            message: error.to_string(),
        }
    }
}
