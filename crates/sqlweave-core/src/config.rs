//! Configuration schema (sqlweave.toml)

use crate::dialect::Dialect;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default config file name looked up in the workspace root
pub const CONFIG_FILE_NAME: &str = "sqlweave.toml";

/// Extra function names for one dialect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSetConfig {
    /// Aggregate functions
    #[serde(default)]
    pub aggregates: Vec<String>,

    /// Window functions
    #[serde(default)]
    pub window: Vec<String>,

    /// Table-valued functions
    #[serde(default)]
    pub table_valued: Vec<String>,
}

impl FunctionSetConfig {
    fn merge(&mut self, other: &FunctionSetConfig) {
        self.aggregates.extend(other.aggregates.iter().cloned());
        self.window.extend(other.window.iter().cloned());
        self.table_valued.extend(other.table_valued.iter().cloned());
    }
}

/// Workspace indexing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    /// File extensions treated as SQL (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Paths to skip, relative to the workspace root (glob patterns)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Quiet period after the last change event before the queue drains
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Parser threads for the initial scan (default: available parallelism)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

fn default_extensions() -> Vec<String> {
    vec!["sql".to_string()]
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude: Vec::new(),
            debounce_ms: default_debounce_ms(),
            max_workers: None,
        }
    }
}

impl IndexSettings {
    /// Check if a path has one of the configured SQL extensions
    pub fn is_sql_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Compile the exclude patterns
    pub fn exclude_filter(&self) -> Result<ExcludeFilter, ConfigError> {
        ExcludeFilter::new(&self.exclude)
    }
}

/// Compiled exclude patterns
///
/// Patterns match root-relative paths with `/` separators and `*` never
/// crosses a separator. A pattern without a `/` matches at any depth, and
/// anything a pattern matches also excludes everything below it.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
    set: GlobSet,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let trimmed = pattern.trim().trim_start_matches("./").trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            let anchored = if trimmed.contains('/') {
                trimmed.to_string()
            } else {
                format!("**/{}", trimmed)
            };

            for glob in [format!("{}/**", anchored), anchored] {
                let glob = GlobBuilder::new(&glob)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
                builder.add(glob);
            }
        }

        let set = builder
            .build()
            .map_err(|e| ConfigError::InvalidPattern(patterns.join(", "), e.to_string()))?;
        Ok(Self { set })
    }

    /// Check if a root-relative path matches an exclude pattern
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.set.is_match(relative.replace('\\', "/"))
    }
}

impl Default for ExcludeFilter {
    fn default() -> Self {
        Self { set: GlobSet::empty() }
    }
}

/// Lineage and impact settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Maximum traversal depth for lineage and transitive impact
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_depth() -> usize {
    10
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Dialect used for files without an explicit one
    #[serde(default)]
    pub dialect: Dialect,

    /// Function names recognized in every dialect
    #[serde(default)]
    pub custom_functions: Vec<String>,

    /// Per-dialect function additions, keyed by dialect name or alias
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSetConfig>,

    /// Indexing settings
    #[serde(default)]
    pub index: IndexSettings,

    /// Analysis settings
    #[serde(default)]
    pub analysis: AnalysisSettings,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            custom_functions: Vec::new(),
            functions: BTreeMap::new(),
            index: IndexSettings::default(),
            analysis: AnalysisSettings::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Surface unknown dialect keys and bad globs at load time
        config.function_overrides()?;
        config.index.exclude_filter()?;

        Ok(config)
    }

    /// Load `sqlweave.toml` from a workspace root, or defaults when absent
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.project_root = root.to_path_buf();
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Per-dialect function additions with aliases folded together
    pub fn function_overrides(&self) -> Result<BTreeMap<Dialect, FunctionSetConfig>, ConfigError> {
        let mut merged: BTreeMap<Dialect, FunctionSetConfig> = BTreeMap::new();

        for (name, set) in &self.functions {
            let dialect = Dialect::from_alias(name)
                .ok_or_else(|| ConfigError::UnknownDialect(name.clone()))?;
            merged.entry(dialect).or_default().merge(set);
        }

        Ok(merged)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Unknown dialect in [functions]: {0}")]
    UnknownDialect(String),

    #[error("Invalid exclude pattern '{0}': {1}")]
    InvalidPattern(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.dialect, Dialect::Generic);
        assert_eq!(config.index.debounce_ms, 300);
        assert_eq!(config.analysis.max_depth, 10);
    }

    #[test]
    fn parses_full_config() {
        let config = Config::from_toml(
            r#"
            dialect = "tsql"
            custom_functions = ["my_udf"]

            [functions.mssql]
            aggregates = ["string_agg"]

            [functions.sqlserver]
            table_valued = ["openjson"]

            [index]
            exclude = ["target/*"]
            debounce_ms = 50
            max_workers = 2

            [analysis]
            max_depth = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect, Dialect::SqlServer);
        assert_eq!(config.index.max_workers, Some(2));
        assert_eq!(config.analysis.max_depth, 4);

        let overrides = config.function_overrides().unwrap();
        let tsql = &overrides[&Dialect::SqlServer];
        assert_eq!(tsql.aggregates, vec!["string_agg".to_string()]);
        assert_eq!(tsql.table_valued, vec!["openjson".to_string()]);
    }

    #[test]
    fn unknown_function_dialect_is_rejected() {
        let err = Config::from_toml("[functions.oracle]\naggregates = [\"x\"]").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDialect(name) if name == "oracle"));
    }

    fn filter(patterns: &[&str]) -> ExcludeFilter {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        ExcludeFilter::new(&patterns).unwrap()
    }

    #[test]
    fn sql_extension_and_excludes() {
        let mut settings = IndexSettings::default();
        settings.exclude = vec!["target/*".to_string(), "vendor".to_string()];
        let excludes = settings.exclude_filter().unwrap();

        assert!(settings.is_sql_file(Path::new("models/a.SQL")));
        assert!(!settings.is_sql_file(Path::new("README.md")));
        assert!(excludes.is_excluded("target/compiled/a.sql"));
        assert!(excludes.is_excluded("vendor/x.sql"));
        assert!(!excludes.is_excluded("models/vendor.sql"));
    }

    #[test]
    fn rooted_patterns_do_not_match_deeper_paths() {
        let excludes = filter(&["target/*"]);
        assert!(excludes.is_excluded("target/a.sql"));
        assert!(!excludes.is_excluded("models/target/x.sql"));
        assert!(!excludes.is_excluded("target.sql"));
    }

    #[test]
    fn double_star_and_multiple_wildcards() {
        let excludes = filter(&["**/target/*", "*.tmp.sql"]);
        assert!(excludes.is_excluded("models/target/x.sql"));
        assert!(excludes.is_excluded("target/x.sql"));
        assert!(excludes.is_excluded("models/a.tmp.sql"));
        assert!(excludes.is_excluded("a.tmp.sql"));
        assert!(!excludes.is_excluded("models/a.sql"));
        assert!(!excludes.is_excluded("models/tmp.sql"));
    }

    #[test]
    fn windows_separators_are_normalized() {
        assert!(filter(&["staging/*"]).is_excluded("staging\\users.sql"));
        assert!(!ExcludeFilter::default().is_excluded("anything.sql"));
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected() {
        let err = Config::from_toml("[index]\nexclude = [\"models/[z-a\"]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(pattern, _) if pattern == "models/[z-a"));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config.dialect, parsed.dialect);
        assert_eq!(config.index, parsed.index);
    }

    #[test]
    fn glob_matching() {
        assert!(filter(&["*"]).is_excluded("anything"));
        assert!(filter(&["staging/*"]).is_excluded("staging/users.sql"));
        assert!(filter(&["*.sql"]).is_excluded("model.sql"));
        assert!(!filter(&["staging/*"]).is_excluded("prod/users.sql"));
    }
}
