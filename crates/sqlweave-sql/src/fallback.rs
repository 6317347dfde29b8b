//! Pattern-based extraction
//!
//! Used when the parser rejects a file, when lowering meets a shape the
//! closed model cannot express, or when the content is not valid UTF-8.
//! Patterns run over the masked text of a [`SourceMap`], so comments and
//! string literals never produce references.

use crate::functions::FunctionRegistry;
use crate::lexer::SourceMap;
use regex::Regex;
use sqlweave_core::{is_qualified, normalize_name, Definition, DefinitionKind, Dialect, Reference};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

const IDENT: &str = r#"(?:"[^"]*"|`[^`]*`|\[[^\]]*\]|[\p{L}_@#][\w$@#]*)"#;

/// Words that can follow FROM/JOIN/USING without being a relation
const NOT_RELATIONS: &[&str] = &[
    "SELECT", "LATERAL", "VALUES", "WHERE", "SET", "OF", "NOWAIT", "SKIP", "ON", "AND", "OR",
    "NOT", "NULL", "WITH", "CASCADE", "RESTRICT", "NO", "BTREE", "HASH", "GIN", "GIST", "BRIN",
];

/// Words that end a FROM item instead of aliasing it
const CLAUSE_WORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "LIMIT", "OFFSET", "FETCH", "HAVING", "UNION", "EXCEPT",
    "INTERSECT", "MINUS", "WINDOW", "QUALIFY", "SET", "RETURNING", "LATERAL", "TABLESAMPLE",
    "FOR", "INTO", "PIVOT", "UNPIVOT", "WITH", "WHEN", "THEN", "AS", "SELECT", "VALUES",
];

/// Functions whose argument syntax uses the FROM keyword
const FROM_ARGUMENT_FUNCTIONS: &[&str] = &["EXTRACT", "SUBSTRING", "SUBSTR", "TRIM", "OVERLAY", "POSITION"];

struct Patterns {
    relation: Regex,
    continuation: Regex,
    alias: Regex,
    write_target: Regex,
    definition: Regex,
    cte: Regex,
}

impl Patterns {
    fn new() -> Self {
        let qualified = format!(r"{IDENT}(?:\s*\.\s*{IDENT})*");
        Self {
            relation: Regex::new(&format!(r"(?i)\b(FROM|JOIN|USING)\s+(?:ONLY\s+)?({qualified})"))
                .expect("relation pattern is valid"),
            continuation: Regex::new(&format!(r"(?i)^\s*,\s*(?:ONLY\s+)?({qualified})"))
                .expect("continuation pattern is valid"),
            alias: Regex::new(&format!(r"(?i)^\s+(?:AS\s+)?({IDENT})")).expect("alias pattern is valid"),
            write_target: Regex::new(&format!(
                r"(?i)\b(?:INSERT\s+(?:OVERWRITE\s+)?(?:INTO\s+)?(?:TABLE\s+)?|UPDATE\s+|DELETE\s+(?:FROM\s+)?|MERGE\s+(?:INTO\s+)?)(?:ONLY\s+)?({qualified})"
            ))
            .expect("write target pattern is valid"),
            definition: Regex::new(&format!(
                r"(?i)\bCREATE\s+(?:OR\s+REPLACE\s+)?(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|TRANSIENT|VOLATILE)\s+)?(?:MATERIALIZED\s+)?(TABLE|VIEW)\s+(?:IF\s+NOT\s+EXISTS\s+)?({qualified})"
            ))
            .expect("definition pattern is valid"),
            cte: Regex::new(&format!(
                r"(?i)(?:\bWITH\s+(?:RECURSIVE\s+)?|,\s*)({IDENT})\s*(?:\([^()]*\)\s*)?AS\s*(?:(?:NOT\s+)?MATERIALIZED\s*)?\("
            ))
            .expect("cte pattern is valid"),
        }
    }
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(Patterns::new)
}

/// References and definitions recovered by patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackOutput {
    pub references: Vec<Reference>,
    pub definitions: Vec<Definition>,
}

/// CTE names declared anywhere in the masked text
pub fn cte_names(map: &SourceMap) -> HashSet<String> {
    patterns()
        .cte
        .captures_iter(map.masked())
        .filter_map(|caps| caps.get(1))
        .map(|m| normalize_name(m.as_str()))
        .collect()
}

fn is_word(text: &str, words: &[&str]) -> bool {
    let upper = text.to_ascii_uppercase();
    words.contains(&upper.as_str())
}

fn followed_by_paren(text: &str, end: usize) -> bool {
    text[end..].trim_start().starts_with('(')
}

/// Last word before `offset`, upper-cased
fn word_before(text: &str, offset: usize) -> String {
    text[..offset]
        .trim_end()
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Whether `offset` sits inside the argument list of EXTRACT(… FROM …) and friends
fn inside_from_argument(text: &str, statement_start: usize, offset: usize) -> bool {
    if statement_start > offset {
        return false;
    }
    let mut depth = 0usize;
    for (i, ch) in text[statement_start..offset].char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth > 0 => depth -= 1,
            '(' => {
                let word = word_before(text, statement_start + i);
                return FROM_ARGUMENT_FUNCTIONS.contains(&word.as_str());
            }
            _ => {}
        }
    }
    false
}

struct Candidate {
    offset: usize,
    name: String,
    alias: Option<String>,
    writes: bool,
}

/// Extract references and definitions from a file that did not parse
pub fn extract(
    map: &SourceMap,
    path: &Path,
    registry: &FunctionRegistry,
    dialect: Dialect,
) -> FallbackOutput {
    let text = map.masked();
    let patterns = patterns();
    let ctes = cte_names(map);

    let mut output = FallbackOutput::default();
    let mut consumers: BTreeMap<usize, String> = BTreeMap::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();

    for caps in patterns.definition.captures_iter(text) {
        let (Some(kind), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let kind = if kind.as_str().eq_ignore_ascii_case("VIEW") {
            DefinitionKind::View
        } else {
            DefinitionKind::Table
        };
        let statement = map.statement_of(name.start());
        consumers.entry(statement).or_insert_with(|| name.as_str().to_string());
        seen.insert(name.start());
        output
            .definitions
            .push(Definition::new(name.as_str(), kind, path, map.line_of(name.start())));
    }

    for caps in patterns.cte.captures_iter(text) {
        if let Some(name) = caps.get(1) {
            output.definitions.push(Definition::new(
                name.as_str(),
                DefinitionKind::Cte,
                path,
                map.line_of(name.start()),
            ));
        }
    }

    for caps in patterns.write_target.captures_iter(text) {
        let Some(name) = caps.get(1) else { continue };
        let keyword_start = caps.get(0).map(|m| m.start()).unwrap_or(name.start());
        if is_word(name.as_str(), NOT_RELATIONS)
            || matches!(word_before(text, keyword_start).as_str(), "FOR" | "ON" | "DO")
        {
            continue;
        }
        let statement = map.statement_of(name.start());
        consumers.entry(statement).or_insert_with(|| name.as_str().to_string());
        if seen.insert(name.start()) {
            candidates.push(Candidate {
                offset: name.start(),
                name: name.as_str().to_string(),
                alias: None,
                writes: true,
            });
        }
    }

    for caps in patterns.relation.captures_iter(text) {
        let (Some(keyword), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let is_from = keyword.as_str().eq_ignore_ascii_case("FROM");

        if is_from {
            let statement = map.statement_of(keyword.start());
            let statement_start = map.statements().get(statement).map(|r| r.start).unwrap_or(0);
            if word_before(text, keyword.start()) == "DISTINCT"
                || inside_from_argument(text, statement_start, keyword.start())
            {
                continue;
            }
        }

        let mut current = (name.start(), name.as_str());
        loop {
            let (start, raw) = current;
            let mut end = start + raw.len();
            let call = followed_by_paren(text, end);
            if !call && !is_word(raw, NOT_RELATIONS) {
                let alias = patterns
                    .alias
                    .captures(&text[end..])
                    .and_then(|a| a.get(1))
                    .filter(|a| !is_word(a.as_str(), CLAUSE_WORDS))
                    .map(|a| {
                        end += a.end();
                        a.as_str().to_string()
                    });

                if seen.insert(start) {
                    candidates.push(Candidate {
                        offset: start,
                        name: raw.to_string(),
                        alias,
                        writes: false,
                    });
                }
            }

            if !is_from || call {
                break;
            }
            match patterns.continuation.captures(&text[end..]).and_then(|c| c.get(1)) {
                Some(next) => current = (end + next.start(), next.as_str()),
                None => break,
            }
        }
    }

    candidates.sort_by_key(|c| c.offset);
    for candidate in candidates {
        let normalized = normalize_name(&candidate.name);
        if ctes.contains(&normalized) {
            continue;
        }
        if !is_qualified(&normalized) && registry.is_function(dialect, &normalized) {
            continue;
        }

        let statement = map.statement_of(candidate.offset);
        let consumer = if candidate.writes {
            None
        } else {
            consumers.get(&statement).cloned()
        };

        output.references.push(
            Reference::new(candidate.name, path, map.line_of(candidate.offset), statement)
                .with_alias(candidate.alias)
                .with_consumer(consumer),
        );
    }

    output.definitions.sort_by_key(|d| d.line);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(sql: &str, dialect: Dialect) -> FallbackOutput {
        let map = SourceMap::new(sql, dialect);
        extract(&map, Path::new("q.sql"), &FunctionRegistry::builtin(), dialect)
    }

    fn names(output: &FallbackOutput) -> Vec<String> {
        output.references.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn from_and_join_references() {
        let out = run("SELECT * FROM a x JOIN s.b ON x.id = b.id LEFT JOIN c USING (id)", Dialect::Generic);
        assert_eq!(names(&out), vec!["a", "s.b", "c"]);
        assert_eq!(out.references[0].alias.as_deref(), Some("x"));
    }

    #[test]
    fn comma_separated_from_list() {
        let out = run("SELECT * FROM a, b AS bb, c WHERE a.id = b.id", Dialect::Generic);
        assert_eq!(names(&out), vec!["a", "b", "c"]);
    }

    #[test]
    fn comments_strings_and_keyword_uses_are_ignored() {
        let sql = "SELECT EXTRACT(YEAR FROM created_at), 'from fake'\n\
                   -- FROM commented\n\
                   FROM events WHERE a IS DISTINCT FROM b";
        let out = run(sql, Dialect::Postgres);
        assert_eq!(names(&out), vec!["events"]);
        assert_eq!(out.references[0].line, 3);
    }

    #[test]
    fn function_call_syntax_is_skipped() {
        let out = run("SELECT * FROM my_func(1) f JOIN t ON true", Dialect::Generic);
        assert_eq!(names(&out), vec!["t"]);
    }

    #[test]
    fn ctes_are_suppressed_across_statements() {
        let sql = "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent;\nSELECT * FROM recent";
        let out = run(sql, Dialect::Generic);
        assert_eq!(names(&out), vec!["orders"]);
        assert!(out.definitions.iter().any(|d| d.kind == DefinitionKind::Cte && d.name == "recent"));
    }

    #[test]
    fn definitions_become_consumers() {
        let sql = "CREATE OR REPLACE VIEW reporting.v AS SELECT * FROM base WHERE (";
        let out = run(sql, Dialect::Generic);
        assert_eq!(out.definitions.len(), 1);
        assert_eq!(out.definitions[0].kind, DefinitionKind::View);
        assert_eq!(out.references[0].consumer.as_deref(), Some("reporting.v"));
    }

    #[test]
    fn write_targets_consume_sources() {
        let out = run("INSERT INTO archive SELECT * FROM orders WHERE", Dialect::Generic);
        assert_eq!(names(&out), vec!["archive", "orders"]);
        assert_eq!(out.references[0].consumer, None);
        assert_eq!(out.references[1].consumer.as_deref(), Some("archive"));
    }

    #[test]
    fn delete_target_consumes_using_sources() {
        let out = run("DELETE FROM orders USING cancelled c WHERE orders.id = c.id AND", Dialect::Postgres);
        assert_eq!(names(&out), vec!["orders", "cancelled"]);
        assert_eq!(out.references[0].consumer, None);
        assert_eq!(out.references[1].consumer.as_deref(), Some("orders"));
    }

    #[test]
    fn tsql_temp_tables_survive() {
        let out = run("SELECT * FROM #staging s JOIN [dbo].[Orders] o ON", Dialect::SqlServer);
        assert_eq!(names(&out), vec!["#staging", "[dbo].[Orders]"]);
    }

    #[test]
    fn statement_indexes_follow_semicolons() {
        let out = run("SELECT * FROM a;\nSELECT * FROM b", Dialect::Generic);
        assert_eq!(out.references[0].statement_index, 0);
        assert_eq!(out.references[1].statement_index, 1);
    }
}
