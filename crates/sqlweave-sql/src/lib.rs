//! SQL reference extraction
//!
//! This crate handles:
//! - Parsing SQL with sqlparser in any supported dialect
//! - Lowering the parser AST into a small closed model
//! - Extracting table/view references and definitions, with CTE suppression
//! - Pattern-based extraction when the parser rejects a file
//! - The per-dialect function registry used to tell functions from tables

pub mod ast;
pub mod extractor;
pub mod fallback;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{LowerError, ObjectName, Relation};
pub use extractor::{Extraction, ReferenceExtractor};
pub use functions::{DialectFunctions, FunctionKind, FunctionRegistry};
pub use lexer::SourceMap;
pub use parser::{ParseError, SqlParser};
