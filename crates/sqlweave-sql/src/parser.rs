//! Dialect-aware parsing with sqlparser

use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::{
    BigQueryDialect, Dialect as SqlDialect, DuckDbDialect, GenericDialect, HiveDialect, MsSqlDialect,
    MySqlDialect, PostgreSqlDialect, RedshiftSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;
use sqlweave_core::Dialect;
use std::sync::OnceLock;

/// Parser bound to one canonical dialect
pub struct SqlParser {
    dialect: Dialect,
    inner: Box<dyn SqlDialect>,
}

impl SqlParser {
    pub fn new() -> Self {
        Self::for_dialect(Dialect::Generic)
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            inner: sqlparser_dialect(dialect),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse a whole file; an empty or comment-only input yields no statements
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, ParseError> {
        Parser::parse_sql(&*self.inner, sql).map_err(|error| {
            let message = error.to_string();
            ParseError {
                line: reported_line(&message),
                message,
            }
        })
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// sqlparser's dialect for a canonical dialect, shared by parser and tokenizer
pub(crate) fn sqlparser_dialect(dialect: Dialect) -> Box<dyn SqlDialect> {
    match dialect {
        Dialect::Generic => Box::new(GenericDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::SqlServer => Box::new(MsSqlDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::Redshift => Box::new(RedshiftSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::Hive => Box::new(HiveDialect {}),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("SQL parse error: {message}")]
pub struct ParseError {
    pub message: String,

    /// 1-indexed line the parser stopped at, when it says
    pub line: Option<usize>,
}

/// sqlparser appends `at Line: N, Column: M` to most errors
fn reported_line(message: &str) -> Option<usize> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Line: (\d+)").expect("line pattern is valid"))
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
