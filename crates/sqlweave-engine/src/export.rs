//! Impact report exports (versioned JSON and Markdown)

use crate::impact::{Impact, ImpactReport};
use serde::{Deserialize, Serialize};
use sqlweave_core::ReportVersion;
use std::path::Path;

/// Versioned, timestamped wrapper around an [`ImpactReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactExport {
    pub version: ReportVersion,

    /// RFC 3339 export time
    pub exported_at: String,

    pub report: ImpactReport,
}

impl ImpactExport {
    pub fn new(report: ImpactReport) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            exported_at: chrono::Utc::now().to_rfc3339(),
            report,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let report = &self.report;

        md.push_str(&format!("# Impact Analysis: `{}`\n\n", report.target.name));
        md.push_str(&format!("**Version:** {}\n\n", self.version));
        md.push_str(&format!("**Exported:** {}\n\n", self.exported_at));
        md.push_str(&format!("**Change:** {}\n\n", report.change));
        md.push_str(&format!("**Severity:** {}\n\n", report.severity));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- Tables affected: {}\n", report.summary.tables_affected));
        md.push_str(&format!("- Views affected: {}\n", report.summary.views_affected));
        md.push_str(&format!("- Queries affected: {}\n", report.summary.queries_affected));
        md.push_str(&format!("- Files affected: {}\n", report.summary.files_affected));
        md.push('\n');

        md.push_str("## Direct Impacts\n\n");
        push_impacts(&mut md, &report.direct_impacts);

        md.push_str("## Transitive Impacts\n\n");
        push_impacts(&mut md, &report.transitive_impacts);

        md.push_str("## Suggestions\n\n");
        if report.suggestions.is_empty() {
            md.push_str("_None_\n");
        }
        for suggestion in &report.suggestions {
            md.push_str(&format!("- {}\n", suggestion));
        }

        md
    }
}

fn push_impacts(md: &mut String, impacts: &[Impact]) {
    if impacts.is_empty() {
        md.push_str("_None_\n\n");
        return;
    }
    for impact in impacts {
        md.push_str(&format!(
            "- `{}` ({}) - {}: {} [{}:{}]\n",
            impact.name,
            impact.kind,
            impact.severity,
            impact.reason,
            impact.file.display(),
            impact.line
        ));
    }
    md.push('\n');
}
