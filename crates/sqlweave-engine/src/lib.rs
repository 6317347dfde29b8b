//! sqlweave engine - impact analysis
//!
//! This crate implements the analytical side of sqlweave:
//! - Change impact analysis over the dependency graph
//! - Severity classification
//! - JSON and Markdown exports of impact reports

pub mod export;
pub mod impact;
pub mod severity;

pub use export::ImpactExport;
pub use impact::{ChangeType, Impact, ImpactAnalyzer, ImpactReport, ImpactSummary};
pub use severity::{Distance, ImpactSeverity};
