//! Integration tests for reference extraction across dialects

use pretty_assertions::assert_eq;
use sqlweave_core::{Config, DefinitionKind, Dialect, ParseStatus};
use sqlweave_sql::{Extraction, ReferenceExtractor};
use std::path::Path;

fn normalized(extraction: &Extraction) -> Vec<String> {
    extraction.references.iter().map(|r| r.normalized_name()).collect()
}

#[test]
fn dbt_style_model_with_multiple_ctes() {
    let sql = r#"
-- staging model
with orders as (
    select * from raw.orders
),
payments as (
    select order_id, sum(amount) as total
    from raw.payments
    group by order_id
)
select o.id, p.total
from orders o
left join payments p on p.order_id = o.id
"#;

    let extraction = ReferenceExtractor::default().extract(sql, Path::new("models/orders.sql"), None);
    assert_eq!(extraction.status, ParseStatus::Ok);
    assert_eq!(normalized(&extraction), vec!["raw.orders", "raw.payments"]);

    let ctes: Vec<&str> = extraction
        .definitions
        .iter()
        .filter(|d| d.kind == DefinitionKind::Cte)
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(ctes, vec!["orders", "payments"]);
    assert_eq!(extraction.references[0].line, 4);
}

#[test]
fn sqlserver_brackets_and_temp_tables() {
    let sql = "SELECT * FROM [dbo].[Orders] o JOIN #staging s ON s.id = o.id";
    let extraction = ReferenceExtractor::default().extract(sql, Path::new("q.sql"), Some(Dialect::SqlServer));
    assert_eq!(normalized(&extraction), vec!["dbo.orders", "#staging"]);
}

#[test]
fn bigquery_backtick_paths() {
    let sql = "SELECT * FROM `proj.ds.Orders` WHERE id IN (SELECT id FROM `proj.ds.refunds`)";
    let extraction = ReferenceExtractor::default().extract(sql, Path::new("q.sql"), Some(Dialect::BigQuery));
    assert_eq!(normalized(&extraction), vec!["proj.ds.orders", "proj.ds.refunds"]);
}

#[test]
fn snowflake_lateral_flatten_is_not_a_table() {
    let sql = "SELECT f.value FROM raw_events e, LATERAL FLATTEN(input => e.payload) f";
    let extraction = ReferenceExtractor::default().extract(sql, Path::new("q.sql"), Some(Dialect::Snowflake));
    assert_eq!(normalized(&extraction), vec!["raw_events"]);
}

#[test]
fn configured_functions_are_excluded() {
    let config = Config::from_toml(
        r#"
        dialect = "postgres"
        custom_functions = ["tenant_rows"]
        "#,
    )
    .unwrap();
    let extractor = ReferenceExtractor::from_config(&config).unwrap();
    assert_eq!(extractor.default_dialect(), Dialect::Postgres);

    let extraction = extractor.extract("SELECT * FROM tenant_rows JOIN accounts a ON true", Path::new("q.sql"), None);
    assert_eq!(normalized(&extraction), vec!["accounts"]);
}

#[test]
fn fallback_and_ast_agree_on_simple_files() {
    let sql = "CREATE TABLE summary AS SELECT * FROM events e JOIN users u ON u.id = e.user_id";
    let extractor = ReferenceExtractor::default();

    let ast = extractor.extract(sql, Path::new("q.sql"), None);
    let patterns = extractor.extract_with_statements(sql, Path::new("q.sql"), None, None);

    assert_eq!(ast.status, ParseStatus::Ok);
    assert_eq!(patterns.status, ParseStatus::Fallback);
    assert_eq!(ast.references, patterns.references);
    assert_eq!(
        ast.object_definitions().collect::<Vec<_>>(),
        patterns.object_definitions().collect::<Vec<_>>()
    );
}

#[test]
fn extraction_is_deterministic() {
    let sql = "SELECT * FROM c JOIN b ON true JOIN a ON true; INSERT INTO d SELECT * FROM c";
    let extractor = ReferenceExtractor::default();
    let first = extractor.extract(sql, Path::new("q.sql"), None);
    for _ in 0..5 {
        assert_eq!(extractor.extract(sql, Path::new("q.sql"), None), first);
    }
}
