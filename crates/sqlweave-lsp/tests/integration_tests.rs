//! Integration tests for the editor command surface

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sqlweave_core::Config;
use sqlweave_index::{FileEvent, IndexManager};
use sqlweave_lsp::{execute, CommandError, COMMANDS};
use std::fs;
use tempfile::TempDir;

fn workspace() -> (TempDir, IndexManager) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.sql"), "CREATE TABLE raw_events (id INT, kind TEXT);").unwrap();
    fs::write(
        dir.path().join("clean.sql"),
        "CREATE VIEW clean_events AS SELECT id, kind FROM raw_events;",
    )
    .unwrap();
    fs::write(
        dir.path().join("rollup.sql"),
        "CREATE VIEW event_rollup AS SELECT kind, count(*) AS n FROM clean_events GROUP BY kind;",
    )
    .unwrap();

    let mut config = Config::default();
    config.project_root = dir.path().to_path_buf();
    let manager = IndexManager::new(config).unwrap();
    manager.scan();
    (dir, manager)
}

fn names(steps: &Value) -> Vec<String> {
    steps
        .as_array()
        .unwrap()
        .iter()
        .map(|step| step["node"]["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn every_advertised_command_is_handled() {
    let (_dir, manager) = workspace();
    for command in COMMANDS {
        let result = execute(&manager, command, &[json!("raw_events")]);
        assert!(result.is_ok(), "{} failed: {:?}", command, result);
    }
}

#[test]
fn lineage_follows_edits_from_the_editor() {
    let (dir, manager) = workspace();

    let downstream = execute(&manager, "sqlweave.traceLineage", &[json!("raw_events"), json!("downstream")]).unwrap();
    assert_eq!(names(&downstream["steps"]), vec!["clean_events", "event_rollup"]);

    // Unsaved buffer contents replace the file's contribution
    manager.enqueue(
        FileEvent::modified(dir.path().join("rollup.sql"))
            .with_content("CREATE VIEW event_rollup AS SELECT count(*) AS n FROM raw_events;"),
    );
    manager.process_pending();

    let downstream = execute(&manager, "sqlweave.traceLineage", &[json!("raw_events"), json!("downstream"), json!(1)]).unwrap();
    assert_eq!(names(&downstream["steps"]), vec!["clean_events", "event_rollup"]);

    let upstream = execute(&manager, "sqlweave.traceLineage", &[json!("event_rollup")]).unwrap();
    assert_eq!(names(&upstream["steps"]), vec!["raw_events"]);
}

#[test]
fn impact_reports_severity_and_consumers() {
    let (_dir, manager) = workspace();

    let report = execute(&manager, "sqlweave.analyzeImpact", &[json!("raw_events"), json!("drop")]).unwrap();
    assert_eq!(report["severity"], json!("high"));
    assert_eq!(report["direct_impacts"][0]["name"], json!("clean_events"));
    assert_eq!(report["transitive_impacts"][0]["name"], json!("event_rollup"));
}

#[test]
fn cycles_are_reported_after_an_edit() {
    let (dir, manager) = workspace();
    assert_eq!(execute(&manager, "sqlweave.detectCycles", &[]).unwrap(), json!([]));

    manager.enqueue(
        FileEvent::modified(dir.path().join("raw.sql"))
            .with_content("CREATE VIEW raw_events AS SELECT id, kind FROM event_rollup;"),
    );
    manager.process_pending();

    let cycles = execute(&manager, "sqlweave.detectCycles", &[]).unwrap();
    assert_eq!(cycles.as_array().map(Vec::len), Some(1));
}

#[test]
fn bad_arguments_are_rejected() {
    let (_dir, manager) = workspace();

    assert!(matches!(
        execute(&manager, "sqlweave.traceLineage", &[json!("raw_events"), json!("sideways")]),
        Err(CommandError::InvalidArgument(_))
    ));
    assert!(matches!(
        execute(&manager, "sqlweave.traceLineage", &[json!("raw_events"), json!("upstream"), json!("deep")]),
        Err(CommandError::InvalidArgument(_))
    ));
}
