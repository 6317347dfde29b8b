//! Dialect function registry
//!
//! Names registered here are never treated as tables. Every dialect starts
//! from a baseline ANSI set, adds its own built-ins, then whatever the
//! workspace configuration supplies. All names are stored upper-cased.

use sqlweave_core::{last_segment, Config, ConfigError, Dialect, FunctionSetConfig};
use std::collections::{BTreeMap, BTreeSet};

/// Category a registered function belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Aggregate,
    Window,
    TableValued,
    /// Configured through `custom_functions`
    Custom,
}

const ANSI_AGGREGATES: &[&str] = &[
    "AVG", "COUNT", "MAX", "MIN", "SUM", "EVERY", "ANY_VALUE", "STDDEV", "STDDEV_POP",
    "STDDEV_SAMP", "VAR_POP", "VAR_SAMP", "VARIANCE", "COVAR_POP", "COVAR_SAMP", "CORR",
    "PERCENTILE_CONT", "PERCENTILE_DISC", "ARRAY_AGG", "LISTAGG",
];

const ANSI_WINDOW: &[&str] = &[
    "ROW_NUMBER", "RANK", "DENSE_RANK", "PERCENT_RANK", "CUME_DIST", "NTILE", "LAG", "LEAD",
    "FIRST_VALUE", "LAST_VALUE", "NTH_VALUE",
];

const ANSI_TABLE_VALUED: &[&str] = &["UNNEST"];

struct Builtins {
    aggregates: &'static [&'static str],
    window: &'static [&'static str],
    table_valued: &'static [&'static str],
}

fn builtins(dialect: Dialect) -> Builtins {
    match dialect {
        Dialect::Generic => Builtins { aggregates: &[], window: &[], table_valued: &[] },
        Dialect::Postgres => Builtins {
            aggregates: &["STRING_AGG", "BOOL_AND", "BOOL_OR", "BIT_AND", "BIT_OR", "JSON_AGG", "JSONB_AGG", "JSON_OBJECT_AGG", "MODE"],
            window: &[],
            table_valued: &[
                "GENERATE_SERIES", "GENERATE_SUBSCRIPTS", "JSON_EACH", "JSON_EACH_TEXT", "JSONB_EACH",
                "JSONB_EACH_TEXT", "JSON_ARRAY_ELEMENTS", "JSONB_ARRAY_ELEMENTS", "JSON_TO_RECORDSET",
                "JSONB_TO_RECORDSET", "REGEXP_MATCHES", "UNNEST",
            ],
        },
        Dialect::MySql => Builtins {
            aggregates: &["GROUP_CONCAT", "BIT_AND", "BIT_OR", "BIT_XOR", "JSON_ARRAYAGG", "JSON_OBJECTAGG", "STD"],
            window: &[],
            table_valued: &["JSON_TABLE"],
        },
        Dialect::SqlServer => Builtins {
            aggregates: &["STRING_AGG", "CHECKSUM_AGG", "COUNT_BIG", "GROUPING_ID", "STDEV", "STDEVP", "VAR", "VARP"],
            window: &[],
            table_valued: &["OPENJSON", "OPENROWSET", "OPENQUERY", "OPENXML", "OPENDATASOURCE", "STRING_SPLIT", "GENERATE_SERIES"],
        },
        Dialect::BigQuery => Builtins {
            aggregates: &["COUNTIF", "LOGICAL_AND", "LOGICAL_OR", "STRING_AGG", "APPROX_COUNT_DISTINCT", "APPROX_QUANTILES", "APPROX_TOP_COUNT", "ARRAY_CONCAT_AGG"],
            window: &[],
            table_valued: &["UNNEST", "EXTERNAL_QUERY", "ML.PREDICT", "ML.EVALUATE", "VECTOR_SEARCH"],
        },
        Dialect::Snowflake => Builtins {
            aggregates: &["ARRAY_UNIQUE_AGG", "BOOLAND_AGG", "BOOLOR_AGG", "COUNT_IF", "HASH_AGG", "MEDIAN", "MODE", "OBJECT_AGG", "APPROX_COUNT_DISTINCT"],
            window: &["CONDITIONAL_CHANGE_EVENT", "CONDITIONAL_TRUE_EVENT", "RATIO_TO_REPORT"],
            table_valued: &["FLATTEN", "GENERATOR", "SPLIT_TO_TABLE", "RESULT_SCAN", "INFER_SCHEMA", "VALIDATE", "IDENTIFIER"],
        },
        Dialect::Sqlite => Builtins {
            aggregates: &["GROUP_CONCAT", "TOTAL", "JSON_GROUP_ARRAY", "JSON_GROUP_OBJECT"],
            window: &[],
            table_valued: &["JSON_EACH", "JSON_TREE", "PRAGMA_TABLE_INFO", "GENERATE_SERIES"],
        },
        Dialect::Redshift => Builtins {
            aggregates: &["BIT_AND", "BIT_OR", "BOOL_AND", "BOOL_OR", "MEDIAN"],
            window: &["RATIO_TO_REPORT"],
            table_valued: &["GENERATE_SERIES"],
        },
        Dialect::DuckDb => Builtins {
            aggregates: &["STRING_AGG", "ARG_MAX", "ARG_MIN", "BOOL_AND", "BOOL_OR", "HISTOGRAM", "LIST", "MEDIAN", "MODE"],
            window: &[],
            table_valued: &[
                "RANGE", "GENERATE_SERIES", "READ_CSV", "READ_CSV_AUTO", "READ_PARQUET", "READ_JSON",
                "READ_JSON_AUTO", "PARQUET_SCAN", "GLOB", "UNNEST",
            ],
        },
        Dialect::Hive => Builtins {
            aggregates: &["COLLECT_LIST", "COLLECT_SET", "PERCENTILE", "PERCENTILE_APPROX", "HISTOGRAM_NUMERIC"],
            window: &[],
            table_valued: &["EXPLODE", "EXPLODE_OUTER", "POSEXPLODE", "POSEXPLODE_OUTER", "INLINE", "INLINE_OUTER", "STACK", "JSON_TUPLE", "PARSE_URL_TUPLE", "RANGE"],
        },
    }
}

/// Function names known for one dialect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialectFunctions {
    pub aggregates: BTreeSet<String>,
    pub window: BTreeSet<String>,
    pub table_valued: BTreeSet<String>,
    pub custom: BTreeSet<String>,
}

impl DialectFunctions {
    fn builtin(dialect: Dialect) -> Self {
        let mut set = Self::default();
        set.add(FunctionKind::Aggregate, ANSI_AGGREGATES.iter().copied());
        set.add(FunctionKind::Window, ANSI_WINDOW.iter().copied());
        set.add(FunctionKind::TableValued, ANSI_TABLE_VALUED.iter().copied());

        let own = builtins(dialect);
        set.add(FunctionKind::Aggregate, own.aggregates.iter().copied());
        set.add(FunctionKind::Window, own.window.iter().copied());
        set.add(FunctionKind::TableValued, own.table_valued.iter().copied());
        set
    }

    /// Register names under a category
    pub fn add<I, S>(&mut self, kind: FunctionKind, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let target = match kind {
            FunctionKind::Aggregate => &mut self.aggregates,
            FunctionKind::Window => &mut self.window,
            FunctionKind::TableValued => &mut self.table_valued,
            FunctionKind::Custom => &mut self.custom,
        };
        target.extend(
            names
                .into_iter()
                .map(|n| n.as_ref().trim().to_uppercase())
                .filter(|n| !n.is_empty()),
        );
    }

    fn merge_config(&mut self, config: &FunctionSetConfig) {
        self.add(FunctionKind::Aggregate, &config.aggregates);
        self.add(FunctionKind::Window, &config.window);
        self.add(FunctionKind::TableValued, &config.table_valued);
    }

    /// Category of a function name, if registered
    ///
    /// The name is compared upper-cased. Qualified names are looked up in
    /// full first (`ML.PREDICT`), then by their last segment.
    pub fn kind_of(&self, name: &str) -> Option<FunctionKind> {
        let upper = name.trim().to_uppercase();
        self.lookup(&upper).or_else(|| {
            let last = last_segment(&upper);
            if last != upper {
                self.lookup(last)
            } else {
                None
            }
        })
    }

    fn lookup(&self, upper: &str) -> Option<FunctionKind> {
        if self.table_valued.contains(upper) {
            Some(FunctionKind::TableValued)
        } else if self.aggregates.contains(upper) {
            Some(FunctionKind::Aggregate)
        } else if self.window.contains(upper) {
            Some(FunctionKind::Window)
        } else if self.custom.contains(upper) {
            Some(FunctionKind::Custom)
        } else {
            None
        }
    }

    /// Check if a name is registered in any category
    pub fn contains(&self, name: &str) -> bool {
        self.kind_of(name).is_some()
    }

    /// Total number of registered names
    pub fn len(&self) -> usize {
        self.aggregates.len() + self.window.len() + self.table_valued.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Function registry for every canonical dialect
///
/// Owned by the extractor; built once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRegistry {
    dialects: BTreeMap<Dialect, DialectFunctions>,
}

impl FunctionRegistry {
    /// Registry with built-in names only
    pub fn builtin() -> Self {
        let dialects = Dialect::ALL
            .iter()
            .map(|&d| (d, DialectFunctions::builtin(d)))
            .collect();

        Self { dialects }
    }

    /// Registry with built-ins plus the configured additions
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();

        for (dialect, set) in config.function_overrides()? {
            registry.entry(dialect).merge_config(&set);
        }
        registry.add_custom(&config.custom_functions);

        Ok(registry)
    }

    fn entry(&mut self, dialect: Dialect) -> &mut DialectFunctions {
        self.dialects
            .entry(dialect)
            .or_insert_with(|| DialectFunctions::builtin(dialect))
    }

    /// Add names of one category to one dialect
    pub fn register<I, S>(&mut self, dialect: Dialect, kind: FunctionKind, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entry(dialect).add(kind, names);
    }

    /// Add custom names to every dialect
    pub fn add_custom<S: AsRef<str>>(&mut self, names: &[S]) {
        for dialect in Dialect::ALL {
            self.entry(dialect).add(FunctionKind::Custom, names.iter().map(|n| n.as_ref()));
        }
    }

    /// Function names for a dialect
    pub fn functions(&self, dialect: Dialect) -> Option<&DialectFunctions> {
        self.dialects.get(&dialect)
    }

    /// Check if `name` is a registered function in `dialect`
    pub fn is_function(&self, dialect: Dialect, name: &str) -> bool {
        self.functions(dialect)
            .map(|f| f.contains(name))
            .unwrap_or(false)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
