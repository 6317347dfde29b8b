//! Diagnostics surfaced by indexing and analysis
//!
//! Codes are part of the published report and LSP output. Existing codes
//! keep their spelling forever; retired behavior gets a new code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    /// Parser rejected the file, references came from pattern extraction
    SqlParseFallback,
    /// Content was not valid UTF-8 and was decoded lossily
    SqlEncodingError,
    /// File disappeared before it could be indexed
    FileUnavailable,
    IoFailure,
    /// Referenced object has no definition in the workspace
    MissingDefinition,
    CircularDependency,
    GraphInconsistency,
    /// Workspace configuration could not be applied
    ConfigInvalid,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlParseFallback => "SQL_PARSE_FALLBACK",
            Self::SqlEncodingError => "SQL_ENCODING_ERROR",
            Self::FileUnavailable => "FILE_UNAVAILABLE",
            Self::IoFailure => "IO_FAILURE",
            Self::MissingDefinition => "MISSING_DEFINITION",
            Self::CircularDependency => "CIRCULAR_DEPENDENCY",
            Self::GraphInconsistency => "GRAPH_INCONSISTENCY",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    /// The file's contribution could not be refreshed
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

/// File and optional 1-indexed line a diagnostic points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: Option<usize>,
}

impl Location {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,

    /// Names of the objects involved (cycle members, missing objects)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            impact: Vec::new(),
        }
    }

    pub fn with_location(self, location: Location) -> Self {
        Self {
            location: Some(location),
            ..self
        }
    }

    pub fn with_impact(self, impact: Vec<String>) -> Self {
        Self { impact, ..self }
    }
}
