//! SQL dialects and their aliases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical SQL dialect
///
/// Every alias accepted in configuration or from the host editor
/// normalizes to exactly one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    /// Generic ANSI SQL (baseline)
    #[default]
    Generic,

    /// PostgreSQL
    Postgres,

    /// MySQL / MariaDB
    MySql,

    /// Microsoft SQL Server (T-SQL)
    SqlServer,

    /// Google BigQuery
    BigQuery,

    /// Snowflake
    Snowflake,

    /// SQLite
    Sqlite,

    /// Amazon Redshift
    Redshift,

    /// DuckDB
    DuckDb,

    /// Hive / Spark SQL / Databricks
    Hive,
}

impl Dialect {
    /// All canonical dialects, in declaration order
    pub const ALL: [Dialect; 10] = [
        Dialect::Generic,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::SqlServer,
        Dialect::BigQuery,
        Dialect::Snowflake,
        Dialect::Sqlite,
        Dialect::Redshift,
        Dialect::DuckDb,
        Dialect::Hive,
    ];

    /// Resolve a dialect name or alias (case-insensitive)
    pub fn from_alias(name: &str) -> Option<Self> {
        let dialect = match name.trim().to_ascii_lowercase().as_str() {
            "generic" | "ansi" | "sql" | "" => Self::Generic,
            "postgres" | "postgresql" | "pg" | "pgsql" => Self::Postgres,
            "mysql" | "mariadb" => Self::MySql,
            "sqlserver" | "tsql" | "t-sql" | "mssql" => Self::SqlServer,
            "bigquery" | "bq" => Self::BigQuery,
            "snowflake" => Self::Snowflake,
            "sqlite" | "sqlite3" => Self::Sqlite,
            "redshift" => Self::Redshift,
            "duckdb" => Self::DuckDb,
            "hive" | "spark" | "sparksql" | "databricks" => Self::Hive,
            _ => return None,
        };
        Some(dialect)
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::SqlServer => "sqlserver",
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Sqlite => "sqlite",
            Self::Redshift => "redshift",
            Self::DuckDb => "duckdb",
            Self::Hive => "hive",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown dialect name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown SQL dialect '{0}'")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s).ok_or_else(|| UnknownDialect(s.to_string()))
    }
}

impl TryFrom<String> for Dialect {
    type Error = UnknownDialect;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.as_str().to_string()
    }
}
