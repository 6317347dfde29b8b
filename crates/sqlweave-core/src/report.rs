//! Versioned JSON report written after a workspace scan
//!
//! Consumers key on `version.major`; fields are only ever added within a
//! major version.

use crate::diagnostic::{Diagnostic, Severity};
use crate::model::{ParseStatus, SourceFile};
use serde::{Deserialize, Serialize};

/// Schema version shared by the index report and impact exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    pub major: u32,
    pub minor: u32,
}

impl ReportVersion {
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// File counts by parse status, plus graph size after the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub parsed: usize,
    pub fallback: usize,
    pub failed: usize,
    pub objects: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub version: ReportVersion,

    /// RFC 3339 generation time
    pub timestamp: String,

    pub summary: IndexSummary,

    /// Files sorted by path
    pub files: Vec<SourceFile>,

    pub diagnostics: Vec<Diagnostic>,
}

impl IndexReport {
    pub fn new(mut files: Vec<SourceFile>, diagnostics: Vec<Diagnostic>, objects: usize, edges: usize) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let count = |status: ParseStatus| files.iter().filter(|f| f.status == status).count();
        let summary = IndexSummary {
            parsed: count(ParseStatus::Ok),
            fallback: count(ParseStatus::Fallback),
            failed: count(ParseStatus::Failed),
            objects,
            edges,
        };

        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary,
            files,
            diagnostics,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON
    pub fn save_to_file(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_json().map_err(std::io::Error::other)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticCode;
    use crate::dialect::Dialect;

    #[test]
    fn summary_counts_statuses() {
        let files = vec![
            SourceFile::new("b.sql", Dialect::Generic, b"select 1", ParseStatus::Fallback),
            SourceFile::new("a.sql", Dialect::Generic, b"select 1", ParseStatus::Ok),
            SourceFile::new("c.sql", Dialect::Generic, b"", ParseStatus::Failed),
        ];
        let diagnostics = vec![Diagnostic::new(DiagnosticCode::IoFailure, Severity::Error, "denied")];

        let report = IndexReport::new(files, diagnostics, 4, 5);
        assert_eq!(report.summary.parsed, 1);
        assert_eq!(report.summary.fallback, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.files[0].path, std::path::PathBuf::from("a.sql"));
        assert!(report.has_errors());
    }

    #[test]
    fn empty_report_round_trips() {
        let report = IndexReport::new(Vec::new(), Vec::new(), 0, 0);
        let parsed: IndexReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(parsed.version, ReportVersion::CURRENT);
        assert_eq!(parsed.summary, IndexSummary::default());
        assert!(!parsed.has_errors());
    }
}
