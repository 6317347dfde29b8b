//! Reference extraction
//!
//! AST extraction runs first: statements are parsed, lowered into the closed
//! model of [`crate::ast`], then walked for relations and definitions. Any
//! failure along the way routes the whole file to [`crate::fallback`].
//! Either way the output is ordered by position in the file.

use crate::ast::{lower_statement, ObjectName, Query, Relation, Statement};
use crate::fallback;
use crate::functions::FunctionRegistry;
use crate::lexer::SourceMap;
use crate::parser::SqlParser;
use crate::LowerError;
use sqlparser::ast as sql;
use sqlweave_core::{
    Config, ConfigError, Definition, DefinitionKind, Diagnostic, DiagnosticCode, Dialect, Location,
    ParseStatus, Reference, Severity,
};
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// Why pattern extraction was used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FallbackReason {
    #[error("{message}")]
    Parse { message: String, line: Option<usize> },

    #[error(transparent)]
    Lowering(#[from] LowerError),

    #[error("no parsed statements were supplied")]
    MissingAst,

    #[error("content is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Result of extracting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// References, in order of appearance
    pub references: Vec<Reference>,

    /// Definitions (CTEs included), in order of appearance
    pub definitions: Vec<Definition>,

    /// How the references were obtained
    pub status: ParseStatus,

    /// Set when `status` is `Fallback`
    pub parse_error: Option<FallbackReason>,
}

impl Extraction {
    fn empty() -> Self {
        Self {
            references: Vec::new(),
            definitions: Vec::new(),
            status: ParseStatus::Ok,
            parse_error: None,
        }
    }

    /// Definitions that become graph objects (CTEs excluded)
    pub fn object_definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter().filter(|d| d.kind != DefinitionKind::Cte)
    }

    /// Diagnostic describing a fallback, if one happened
    pub fn fallback_diagnostic(&self, path: &Path) -> Option<Diagnostic> {
        let reason = self.parse_error.as_ref()?;
        let file = path.display().to_string();

        let (code, location) = match reason {
            FallbackReason::Encoding(_) => (DiagnosticCode::SqlEncodingError, Location::new(file)),
            FallbackReason::Parse { line: Some(line), .. } => {
                (DiagnosticCode::SqlParseFallback, Location::with_line(file, *line))
            }
            _ => (DiagnosticCode::SqlParseFallback, Location::new(file)),
        };

        let message = format!("Used pattern extraction: {}", reason);
        Some(Diagnostic::new(code, Severity::Warn, message).with_location(location))
    }
}

/// Extracts references and definitions from SQL text
#[derive(Debug, Clone)]
pub struct ReferenceExtractor {
    registry: FunctionRegistry,
    default_dialect: Dialect,
}

impl ReferenceExtractor {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry,
            default_dialect: Dialect::Generic,
        }
    }

    /// Dialect used when a file does not specify one
    pub fn with_default_dialect(mut self, dialect: Dialect) -> Self {
        self.default_dialect = dialect;
        self
    }

    /// Build an extractor from workspace configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(FunctionRegistry::from_config(config)?).with_default_dialect(config.dialect))
    }

    pub fn default_dialect(&self) -> Dialect {
        self.default_dialect
    }

    /// Parse and extract a SQL file
    pub fn extract(&self, sql: &str, path: &Path, dialect: Option<Dialect>) -> Extraction {
        let dialect = dialect.unwrap_or(self.default_dialect);
        if sql.trim().is_empty() {
            return Extraction::empty();
        }

        let map = SourceMap::new(sql, dialect);
        match SqlParser::for_dialect(dialect).parse(sql) {
            Ok(statements) => self.extract_statements(&map, path, dialect, &statements),
            Err(err) => {
                let reason = FallbackReason::Parse {
                    message: err.message,
                    line: err.line,
                };
                self.fallback(&map, path, dialect, reason)
            }
        }
    }

    /// Extract raw file content, decoding lossily when it is not UTF-8
    pub fn extract_bytes(&self, bytes: &[u8], path: &Path, dialect: Option<Dialect>) -> Extraction {
        match std::str::from_utf8(bytes) {
            Ok(sql) => self.extract(sql, path, dialect),
            Err(err) => {
                let dialect = dialect.unwrap_or(self.default_dialect);
                let text = String::from_utf8_lossy(bytes);
                let map = SourceMap::new(&text, dialect);
                self.fallback(&map, path, dialect, FallbackReason::Encoding(err.to_string()))
            }
        }
    }

    /// Extract using statements the caller already parsed
    ///
    /// `None` means no AST is available and pattern extraction is used.
    pub fn extract_with_statements(
        &self,
        sql: &str,
        path: &Path,
        dialect: Option<Dialect>,
        statements: Option<&[sql::Statement]>,
    ) -> Extraction {
        let dialect = dialect.unwrap_or(self.default_dialect);
        if sql.trim().is_empty() {
            return Extraction::empty();
        }

        let map = SourceMap::new(sql, dialect);
        match statements {
            Some(statements) => self.extract_statements(&map, path, dialect, statements),
            None => self.fallback(&map, path, dialect, FallbackReason::MissingAst),
        }
    }

    fn extract_statements(
        &self,
        map: &SourceMap,
        path: &Path,
        dialect: Dialect,
        statements: &[sql::Statement],
    ) -> Extraction {
        let lowered = match statements.iter().map(lower_statement).collect::<Result<Vec<_>, _>>() {
            Ok(lowered) => lowered,
            Err(err) => return self.fallback(map, path, dialect, err.into()),
        };

        let mut cte_names = Vec::new();
        for statement in &lowered {
            statement.cte_names(&mut cte_names);
        }
        let ctes: HashSet<String> = cte_names
            .iter()
            .map(|name| ObjectName::new([name.as_str()]).normalized())
            .collect();

        // Semicolon splitting disagrees with the parser (procedural blocks and
        // the like): search the whole file and derive indexes from offsets
        let aligned = map.statements().len() == lowered.len();

        let mut walker = Walker {
            registry: &self.registry,
            dialect,
            map,
            path,
            ctes: &ctes,
            claimed: HashSet::new(),
            range: map.full_range(),
            statement_index: 0,
            aligned,
            references: Vec::new(),
            definitions: Vec::new(),
        };

        for (index, statement) in lowered.iter().enumerate() {
            walker.statement_index = index;
            walker.range = if aligned {
                map.statements()[index].clone()
            } else {
                map.full_range()
            };
            walker.statement(statement);
        }

        let Walker { mut references, mut definitions, .. } = walker;
        references.sort_by_key(|(offset, _)| *offset);
        definitions.sort_by_key(|(offset, _)| *offset);

        debug!(
            path = %path.display(),
            references = references.len(),
            definitions = definitions.len(),
            "extracted SQL file"
        );

        Extraction {
            references: references.into_iter().map(|(_, r)| r).collect(),
            definitions: definitions.into_iter().map(|(_, d)| d).collect(),
            status: ParseStatus::Ok,
            parse_error: None,
        }
    }

    fn fallback(&self, map: &SourceMap, path: &Path, dialect: Dialect, reason: FallbackReason) -> Extraction {
        debug!(path = %path.display(), reason = %reason, "using pattern extraction");

        let output = fallback::extract(map, path, &self.registry, dialect);
        Extraction {
            references: output.references,
            definitions: output.definitions,
            status: ParseStatus::Fallback,
            parse_error: Some(reason),
        }
    }
}

impl Default for ReferenceExtractor {
    fn default() -> Self {
        Self::new(FunctionRegistry::builtin())
    }
}

/// Walks lowered statements, locating each name in the source
struct Walker<'a> {
    registry: &'a FunctionRegistry,
    dialect: Dialect,
    map: &'a SourceMap,
    path: &'a Path,
    ctes: &'a HashSet<String>,
    claimed: HashSet<usize>,
    range: Range<usize>,
    statement_index: usize,
    aligned: bool,
    references: Vec<(usize, Reference)>,
    definitions: Vec<(usize, Definition)>,
}

impl Walker<'_> {
    fn statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Query(query) | Statement::Other(query) => self.query(query, None),
            Statement::Create { kind, name, query } => {
                self.definition(name, *kind);
                if let Some(query) = query {
                    self.query(query, Some(name));
                }
            }
            Statement::Write { targets, query } => {
                for target in targets {
                    self.reference(target, None, None);
                }
                self.query(query, targets.first());
            }
        }
    }

    fn query(&mut self, query: &Query, consumer: Option<&ObjectName>) {
        for cte in &query.ctes {
            self.definition(&cte.object_name(), DefinitionKind::Cte);
            self.query(&cte.query, consumer);
        }
        for relation in &query.relations {
            match relation {
                Relation::Table { name, alias } => self.reference(name, alias.as_deref(), consumer),
                Relation::Function { .. } => {}
            }
        }
        for subquery in &query.subqueries {
            self.query(subquery, consumer);
        }
    }

    /// First non-blank offset of the current range
    fn anchor(&self) -> usize {
        let text = &self.map.masked()[self.range.clone()];
        self.range.start + (text.len() - text.trim_start().len())
    }

    /// Offset and statement index of a name
    ///
    /// The parser's position wins. Names it did not position are searched
    /// for in the token stream of the current range.
    fn position(&mut self, name: &ObjectName) -> (usize, usize) {
        let offset = match name.start.and_then(|start| self.map.offset_of(start)) {
            Some(offset) => {
                self.claimed.insert(offset);
                offset
            }
            None => self
                .map
                .locate(&name.normalized(), self.range.clone(), &mut self.claimed)
                .unwrap_or_else(|| self.anchor()),
        };
        let statement = if self.aligned {
            self.statement_index
        } else {
            self.map.statement_of(offset)
        };
        (offset, statement)
    }

    fn reference(&mut self, name: &ObjectName, alias: Option<&str>, consumer: Option<&ObjectName>) {
        let normalized = name.normalized();
        if !name.is_qualified()
            && (self.ctes.contains(&normalized) || self.registry.is_function(self.dialect, &normalized))
        {
            return;
        }

        let (offset, statement) = self.position(name);
        let reference = Reference::new(name.to_string(), self.path, self.map.line_of(offset), statement)
            .with_alias(alias.map(str::to_string))
            .with_consumer(consumer.map(|c| c.to_string()));
        self.references.push((offset, reference));
    }

    fn definition(&mut self, name: &ObjectName, kind: DefinitionKind) {
        let (offset, _) = self.position(name);
        let definition = Definition::new(name.to_string(), kind, self.path, self.map.line_of(offset));
        self.definitions.push((offset, definition));
    }
}
