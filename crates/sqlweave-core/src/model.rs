//! Extraction data model
//!
//! These records are produced by the reference extractor and consumed by the
//! dependency graph. Object names keep their original spelling; identity is
//! always computed through [`normalize_name`].

use crate::dialect::Dialect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Outcome of extracting a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    /// AST extraction succeeded
    Ok,

    /// AST extraction failed; pattern extraction was used instead
    Fallback,

    /// The file could not be read at all
    Failed,
}

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fallback => write!(f, "fallback"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An indexed SQL source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path of the file (unique key)
    pub path: PathBuf,

    /// Dialect the file was extracted with
    pub dialect: Dialect,

    /// SHA-256 of the raw content, hex encoded
    pub content_hash: String,

    /// When the file was last indexed
    pub last_indexed: DateTime<Utc>,

    /// Parse status of the last extraction
    pub status: ParseStatus,
}

impl SourceFile {
    /// Create a record for content indexed now
    pub fn new(path: impl Into<PathBuf>, dialect: Dialect, content: &[u8], status: ParseStatus) -> Self {
        Self {
            path: path.into(),
            dialect,
            content_hash: Self::hash_content(content),
            last_indexed: Utc::now(),
            status,
        }
    }

    /// Hash raw file content
    pub fn hash_content(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }
}

/// Kind of object a definition introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Table,
    View,
    /// Statement-scoped; never a graph-level object
    Cte,
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
            Self::Cte => write!(f, "cte"),
        }
    }
}

/// An object defined by a SQL file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Definition {
    /// Name as written (case preserved)
    pub name: String,

    /// Kind of object
    pub kind: DefinitionKind,

    /// Defining file
    pub file: PathBuf,

    /// Line number (1-indexed)
    pub line: usize,
}

impl Definition {
    pub fn new(name: impl Into<String>, kind: DefinitionKind, file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            file: file.into(),
            line,
        }
    }

    /// Normalized identity of the defined object
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A reference from a SQL file to a named object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced object name as written
    pub name: String,

    /// Alias given to the object in the referencing statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Referencing file
    pub file: PathBuf,

    /// Line number (1-indexed)
    pub line: usize,

    /// Statement index within the file (0-indexed)
    pub statement_index: usize,

    /// Object whose definition or write consumes this reference.
    /// `None` when the file itself is the consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
}

impl Reference {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, line: usize, statement_index: usize) -> Self {
        Self {
            name: name.into(),
            alias: None,
            file: file.into(),
            line,
            statement_index,
            consumer: None,
        }
    }

    /// Set the alias
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    /// Set the consuming object
    pub fn with_consumer(mut self, consumer: Option<String>) -> Self {
        self.consumer = consumer;
        self
    }

    /// Normalized identity of the referenced object
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Normalize an object name into its graph identity
///
/// Identifier quotes (`"…"`, `` `…` ``, `[…]`) are stripped, parts are
/// split on dots outside quotes, lowercased and re-joined with `.`.
pub fn normalize_name(name: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut closing: Option<char> = None;

    for ch in name.trim().chars() {
        match closing {
            Some(close) if ch == close => closing = None,
            Some(_) => current.push(ch),
            None => match ch {
                '"' => closing = Some('"'),
                '`' => closing = Some('`'),
                '[' => closing = Some(']'),
                '.' => parts.push(std::mem::take(&mut current)),
                c if c.is_whitespace() => {}
                c => current.push(c),
            },
        }
    }
    parts.push(current);

    parts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Last dotted segment of a normalized name
pub fn last_segment(normalized: &str) -> &str {
    normalized.rsplit('.').next().unwrap_or(normalized)
}

/// Whether a normalized name carries a schema/database qualifier
pub fn is_qualified(normalized: &str) -> bool {
    normalized.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_quotes_and_case() {
        assert_eq!(normalize_name("Orders"), "orders");
        assert_eq!(normalize_name("\"Sales\".\"Orders\""), "sales.orders");
        assert_eq!(normalize_name("[dbo].[Orders]"), "dbo.orders");
        assert_eq!(normalize_name("`proj.ds.Orders`"), "proj.ds.orders");
        assert_eq!(normalize_name(" analytics . orders "), "analytics.orders");
    }

    #[test]
    fn segments() {
        assert_eq!(last_segment("a.b.c"), "c");
        assert_eq!(last_segment("c"), "c");
        assert!(is_qualified("a.c"));
        assert!(!is_qualified("c"));
    }

    #[test]
    fn content_hash_is_stable() {
        let a = SourceFile::new("a.sql", Dialect::Generic, b"select 1", ParseStatus::Ok);
        let b = SourceFile::new("a.sql", Dialect::Generic, b"select 1", ParseStatus::Ok);
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn reference_serialization_skips_empty_fields() {
        let reference = Reference::new("t", "a.sql", 3, 0);
        let json = serde_json::to_string(&reference).unwrap();
        assert!(!json.contains("alias"));
        assert!(!json.contains("consumer"));
    }
}
