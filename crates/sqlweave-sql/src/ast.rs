//! Closed statement model
//!
//! sqlparser's AST is large and grows with every release. Extraction only
//! needs relations, CTEs, nested queries and write targets, so statements
//! are lowered into this small model first. Table factors the model cannot
//! express make lowering fail, and the caller falls back to pattern
//! extraction for the whole file.

use sqlparser::ast as sql;
use sqlparser::ast::{visit_relations, SetExpr, TableFactor, Visit, Visitor};
use sqlparser::tokenizer::Location;
use sqlweave_core::{normalize_name, DefinitionKind};
use std::hash::{Hash, Hasher};
use std::ops::ControlFlow;

/// A possibly qualified object name, parts as written
///
/// `start` is where the parser saw the first part, when it recorded one.
/// Like sqlparser's `Ident`, equality and hashing ignore the position.
#[derive(Debug, Clone)]
pub struct ObjectName {
    pub parts: Vec<String>,
    pub start: Option<Location>,
}

impl PartialEq for ObjectName {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for ObjectName {}

impl Hash for ObjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

/// Start of an identifier, if the parser recorded its span
fn ident_start(ident: &sql::Ident) -> Option<Location> {
    Some(ident.span.start).filter(|location| location.line > 0 && location.column > 0)
}

impl ObjectName {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
            start: None,
        }
    }

    pub fn with_start(mut self, start: Option<Location>) -> Self {
        self.start = start;
        self
    }

    fn from_sql(name: &sql::ObjectName) -> Self {
        Self::new(name.0.iter().map(|ident| ident.value.clone())).with_start(name.0.first().and_then(ident_start))
    }

    /// Graph identity of this name
    pub fn normalized(&self) -> String {
        normalize_name(&self.to_string())
    }

    /// Last part (the object itself, without qualifiers)
    pub fn last(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_qualified(&self) -> bool {
        self.parts.len() > 1
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            let plain = !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '@' | '#'));
            if plain {
                f.write_str(part)?;
            } else {
                write!(f, "\"{}\"", part.replace('"', ""))?;
            }
        }
        Ok(())
    }
}

/// A relation appearing at the top level of a query's FROM clauses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// A named table, view or CTE
    Table {
        name: ObjectName,
        alias: Option<String>,
    },

    /// Table-valued function call syntax
    Function { name: ObjectName },
}

impl Relation {
    pub fn name(&self) -> &ObjectName {
        match self {
            Self::Table { name, .. } | Self::Function { name } => name,
        }
    }
}

/// A common table expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cte {
    pub name: String,
    pub start: Option<Location>,
    pub query: Query,
}

impl Cte {
    fn lower(cte: &sql::Cte) -> Result<Self, LowerError> {
        Ok(Self {
            name: cte.alias.name.value.clone(),
            start: ident_start(&cte.alias.name),
            query: lower_query(&cte.query)?,
        })
    }

    /// The CTE name as an object name, carrying its position
    pub fn object_name(&self) -> ObjectName {
        ObjectName::new([self.name.as_str()]).with_start(self.start)
    }
}

/// A query: its CTEs, its own relations, and every nested query
///
/// Derived tables, expression subqueries and subqueries in function
/// arguments all end up in `subqueries`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub ctes: Vec<Cte>,
    pub relations: Vec<Relation>,
    pub subqueries: Vec<Query>,
}

impl Query {
    /// Every CTE name declared in this query or any nested query
    pub fn cte_names(&self, out: &mut Vec<String>) {
        for cte in &self.ctes {
            out.push(cte.name.clone());
            cte.query.cte_names(out);
        }
        for sub in &self.subqueries {
            sub.cte_names(out);
        }
    }

    fn remove_first_table(&mut self, target: &ObjectName) {
        let normalized = target.normalized();
        if let Some(pos) = self.relations.iter().position(|r| {
            matches!(r, Relation::Table { name, .. } if name.normalized() == normalized)
        }) {
            self.relations.remove(pos);
        }
    }
}

/// A lowered statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// A plain query
    Query(Query),

    /// `CREATE TABLE` / `CREATE VIEW`, with the defining query if any
    Create {
        kind: DefinitionKind,
        name: ObjectName,
        query: Option<Query>,
    },

    /// `INSERT` / `UPDATE` / `DELETE` / `MERGE`
    ///
    /// `targets` are written to; `query` holds everything read.
    Write {
        targets: Vec<ObjectName>,
        query: Query,
    },

    /// Any other statement; relations are collected without structure
    Other(Query),
}

impl Statement {
    pub fn cte_names(&self, out: &mut Vec<String>) {
        match self {
            Self::Query(query) | Self::Write { query, .. } | Self::Other(query) => query.cte_names(out),
            Self::Create { query, .. } => {
                if let Some(query) = query {
                    query.cte_names(out);
                }
            }
        }
    }
}

/// Lowering failure; the file is handed to pattern extraction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    #[error("unsupported table factor: {0}")]
    UnsupportedRelation(String),

    #[error("unsupported query body: {0}")]
    UnsupportedBody(String),
}

/// Collects top-level relations and first-level nested queries
#[derive(Default)]
struct FragmentCollector {
    depth: usize,
    relations: Vec<Relation>,
    subqueries: Vec<sql::Query>,
}

impl Visitor for FragmentCollector {
    type Break = LowerError;

    fn pre_visit_query(&mut self, query: &sql::Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.subqueries.push(query.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &sql::Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }

        match factor {
            TableFactor::Table { name, alias, args, .. } => {
                let name = ObjectName::from_sql(name);
                let relation = if args.is_some() {
                    Relation::Function { name }
                } else {
                    Relation::Table {
                        name,
                        alias: alias.as_ref().map(|a| a.name.value.clone()),
                    }
                };
                self.relations.push(relation);
            }
            TableFactor::Function { name, .. } => {
                self.relations.push(Relation::Function {
                    name: ObjectName::from_sql(name),
                });
            }
            // Inner factors and queries of these are visited on their own
            TableFactor::Derived { .. }
            | TableFactor::TableFunction { .. }
            | TableFactor::UNNEST { .. }
            | TableFactor::NestedJoin { .. }
            | TableFactor::Pivot { .. }
            | TableFactor::Unpivot { .. } => {}
            other => {
                let shape = other.to_string();
                let head = shape.split_whitespace().next().unwrap_or("").to_string();
                return ControlFlow::Break(LowerError::UnsupportedRelation(head));
            }
        }

        ControlFlow::Continue(())
    }
}

impl FragmentCollector {
    fn collect<V: Visit>(node: &V) -> Result<Query, LowerError> {
        let mut collector = Self::default();
        collector.visit(node)?;
        collector.finish()
    }

    fn visit<V: Visit>(&mut self, node: &V) -> Result<(), LowerError> {
        match node.visit(self) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(()),
        }
    }

    fn finish(self) -> Result<Query, LowerError> {
        let subqueries = self
            .subqueries
            .iter()
            .map(lower_query)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Query {
            ctes: Vec::new(),
            relations: self.relations,
            subqueries,
        })
    }
}

/// Lower a parser query
pub fn lower_query(query: &sql::Query) -> Result<Query, LowerError> {
    let mut ctes = Vec::new();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ctes.push(Cte::lower(cte)?);
        }
    }

    let mut collector = FragmentCollector::default();
    match query.body.as_ref() {
        SetExpr::Table(table) => {
            if let Some(table_name) = &table.table_name {
                let parts = table.schema_name.iter().cloned().chain(std::iter::once(table_name.clone()));
                collector.relations.push(Relation::Table {
                    name: ObjectName::new(parts),
                    alias: None,
                });
            }
        }
        SetExpr::Insert(_) | SetExpr::Update(_) => {
            return Err(LowerError::UnsupportedBody("nested write".to_string()));
        }
        body => collector.visit(body)?,
    }
    collector.visit(&query.order_by)?;

    let mut lowered = collector.finish()?;
    lowered.ctes = ctes;
    Ok(lowered)
}

fn factor_name(factor: &TableFactor) -> Option<ObjectName> {
    match factor {
        TableFactor::Table { name, args: None, .. } => Some(ObjectName::from_sql(name)),
        _ => None,
    }
}

fn write_statement(targets: Vec<ObjectName>, mut query: Query) -> Statement {
    for target in &targets {
        query.remove_first_table(target);
    }
    Statement::Write { targets, query }
}

/// Lower one parser statement
pub fn lower_statement(statement: &sql::Statement) -> Result<Statement, LowerError> {
    let lowered = match statement {
        sql::Statement::Query(query) => match query.body.as_ref() {
            // WITH ... INSERT / UPDATE: the CTEs belong to the write
            SetExpr::Insert(inner) | SetExpr::Update(inner) => {
                let mut write = lower_statement(inner)?;
                if let (Statement::Write { query: body, .. }, Some(with)) = (&mut write, &query.with) {
                    for cte in &with.cte_tables {
                        body.ctes.push(Cte::lower(cte)?);
                    }
                }
                write
            }
            _ => Statement::Query(lower_query(query)?),
        },
        sql::Statement::CreateTable(create) => Statement::Create {
            kind: DefinitionKind::Table,
            name: ObjectName::from_sql(&create.name),
            query: create.query.as_deref().map(lower_query).transpose()?,
        },
        sql::Statement::CreateView { name, query, .. } => Statement::Create {
            kind: DefinitionKind::View,
            name: ObjectName::from_sql(name),
            query: Some(lower_query(query)?),
        },
        sql::Statement::Insert(insert) => {
            let target = ObjectName::from_sql(&insert.table_name);
            write_statement(vec![target], FragmentCollector::collect(statement)?)
        }
        sql::Statement::Update { table, .. } => {
            let targets = factor_name(&table.relation).into_iter().collect();
            write_statement(targets, FragmentCollector::collect(statement)?)
        }
        sql::Statement::Delete(delete) => {
            let query = FragmentCollector::collect(statement)?;
            let targets: Vec<ObjectName> = if delete.tables.is_empty() {
                query
                    .relations
                    .iter()
                    .find_map(|r| match r {
                        Relation::Table { name, .. } => Some(name.clone()),
                        Relation::Function { .. } => None,
                    })
                    .into_iter()
                    .collect()
            } else {
                delete.tables.iter().map(ObjectName::from_sql).collect()
            };
            write_statement(targets, query)
        }
        sql::Statement::Merge { table, .. } => {
            let targets = factor_name(table).into_iter().collect();
            write_statement(targets, FragmentCollector::collect(statement)?)
        }
        other => {
            let mut query = FragmentCollector::collect(other)?;
            let mut seen: Vec<ObjectName> = query.relations.iter().map(|r| r.name().clone()).collect();
            let flow = visit_relations(other, |name| {
                let name = ObjectName::from_sql(name);
                if name.parts.is_empty() {
                    return ControlFlow::Break(LowerError::UnsupportedRelation("empty name".to_string()));
                }
                if !seen.contains(&name) {
                    seen.push(name.clone());
                    query.relations.push(Relation::Table { name, alias: None });
                }
                ControlFlow::Continue(())
            });
            if let ControlFlow::Break(err) = flow {
                return Err(err);
            }
            Statement::Other(query)
        }
    };

    Ok(lowered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    fn lower(sql: &str) -> Statement {
        let statements = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        lower_statement(&statements[0]).unwrap()
    }

    fn table_names(query: &Query) -> Vec<String> {
        query
            .relations
            .iter()
            .filter_map(|r| match r {
                Relation::Table { name, .. } => Some(name.to_string()),
                Relation::Function { .. } => None,
            })
            .collect()
    }

    #[test]
    fn select_with_joins() {
        let Statement::Query(query) = lower("SELECT * FROM a JOIN s.b AS bb ON a.id = bb.id") else {
            panic!("expected query");
        };
        assert_eq!(table_names(&query), vec!["a", "s.b"]);
        assert!(matches!(
            &query.relations[1],
            Relation::Table { alias: Some(alias), .. } if alias == "bb"
        ));
    }

    #[test]
    fn ctes_and_subqueries_are_nested() {
        let Statement::Query(query) = lower(
            "WITH recent AS (SELECT * FROM orders) \
             SELECT * FROM recent r WHERE r.id IN (SELECT id FROM flagged)",
        ) else {
            panic!("expected query");
        };
        assert_eq!(query.ctes.len(), 1);
        assert_eq!(query.ctes[0].name, "recent");
        assert_eq!(table_names(&query.ctes[0].query), vec!["orders"]);
        assert_eq!(table_names(&query), vec!["recent"]);
        assert_eq!(query.subqueries.len(), 1);
        assert_eq!(table_names(&query.subqueries[0]), vec!["flagged"]);
    }

    #[test]
    fn derived_tables_become_subqueries() {
        let Statement::Query(query) = lower("SELECT * FROM (SELECT * FROM inner_t) d JOIN outer_t o ON true") else {
            panic!("expected query");
        };
        assert_eq!(table_names(&query), vec!["outer_t"]);
        assert_eq!(table_names(&query.subqueries[0]), vec!["inner_t"]);
    }

    #[test]
    fn table_function_syntax_is_a_function() {
        let Statement::Query(query) = lower("SELECT * FROM generate_series(1, 3) g") else {
            panic!("expected query");
        };
        assert!(matches!(&query.relations[0], Relation::Function { name } if name.last() == "generate_series"));
    }

    #[test]
    fn create_view_keeps_defining_query() {
        let Statement::Create { kind, name, query } = lower("CREATE VIEW v AS SELECT * FROM t") else {
            panic!("expected create");
        };
        assert_eq!(kind, DefinitionKind::View);
        assert_eq!(name.to_string(), "v");
        assert_eq!(table_names(&query.unwrap()), vec!["t"]);
    }

    #[test]
    fn insert_select_separates_target() {
        let Statement::Write { targets, query } = lower("INSERT INTO archive SELECT * FROM orders") else {
            panic!("expected write");
        };
        assert_eq!(targets, vec![ObjectName::new(["archive"])]);
        assert_eq!(table_names(&query.subqueries[0]), vec!["orders"]);
    }

    #[test]
    fn delete_target_removed_from_sources() {
        let Statement::Write { targets, query } =
            lower("DELETE FROM orders WHERE id IN (SELECT id FROM cancelled)")
        else {
            panic!("expected write");
        };
        assert_eq!(targets, vec![ObjectName::new(["orders"])]);
        assert!(table_names(&query).is_empty());
        assert_eq!(table_names(&query.subqueries[0]), vec!["cancelled"]);
    }

    #[test]
    fn other_statements_collect_relations_once() {
        let Statement::Other(query) = lower("ALTER TABLE orders ADD COLUMN note TEXT") else {
            panic!("expected other");
        };
        assert_eq!(table_names(&query), vec!["orders"]);

        let Statement::Other(query) = lower("CREATE INDEX idx_orders ON orders (id)") else {
            panic!("expected other");
        };
        assert_eq!(table_names(&query), vec!["orders"]);
    }

    #[test]
    fn names_carry_parser_positions() {
        let Statement::Query(query) = lower("WITH recent AS (SELECT 1)\nSELECT *\nFROM   recent JOIN s.orders o ON true") else {
            panic!("expected query");
        };
        let start = query.ctes[0].start.unwrap();
        assert_eq!((start.line, start.column), (1, 6));

        let start = query.relations[0].name().start.unwrap();
        assert_eq!((start.line, start.column), (3, 8));
        let start = query.relations[1].name().start.unwrap();
        assert_eq!((start.line, start.column), (3, 20));

        // positions never affect equality
        assert_eq!(query.relations[0].name(), &ObjectName::new(["recent"]));
    }

    #[test]
    fn object_name_display_quotes_unusual_parts() {
        let name = ObjectName::new(["Sales", "Order Items"]);
        assert_eq!(name.to_string(), "Sales.\"Order Items\"");
        assert_eq!(name.normalized(), "sales.order items");
    }
}
