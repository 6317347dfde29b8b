//! sqlweave core
//!
//! Core domain model shared by every sqlweave crate: source files,
//! references, definitions, dialects, configuration and diagnostics.
//! Never rename diagnostic codes - they are part of the public API.

pub mod config;
pub mod diagnostic;
pub mod dialect;
pub mod model;
pub mod report;

pub use config::{AnalysisSettings, Config, ConfigError, ExcludeFilter, FunctionSetConfig, IndexSettings};
pub use diagnostic::{Diagnostic, DiagnosticCode, Location, Severity};
pub use dialect::{Dialect, UnknownDialect};
pub use model::{
    is_qualified, last_segment, normalize_name, Definition, DefinitionKind, ParseStatus,
    Reference, SourceFile,
};
pub use report::{IndexReport, IndexSummary, ReportVersion};
