//! Integration tests for workspace indexing and the update worker

use pretty_assertions::assert_eq;
use sqlweave_core::{Config, DiagnosticCode, ParseStatus, Severity};
use sqlweave_engine::{ChangeType, ImpactSeverity};
use sqlweave_graph::{Direction, NodeKind};
use sqlweave_index::{FileEvent, IndexManager, QueueState, StatusReport};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn manager(root: &Path, debounce_ms: u64) -> IndexManager {
    let mut config = Config::default();
    config.project_root = root.to_path_buf();
    config.index.debounce_ms = debounce_ms;
    config.index.max_workers = Some(2);
    IndexManager::new(config).unwrap()
}

fn codes(report: &StatusReport) -> Vec<DiagnosticCode> {
    report.diagnostics.iter().map(|d| d.code).collect()
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("ddl")).unwrap();
    fs::create_dir_all(root.join("views")).unwrap();
    fs::create_dir_all(root.join("reports")).unwrap();
    fs::write(root.join("ddl/orders.sql"), "CREATE TABLE orders (id INT, total INT);").unwrap();
    fs::write(
        root.join("views/v_orders.sql"),
        "CREATE VIEW v_orders AS\nSELECT id, total\nFROM orders\nWHERE total > 0;",
    )
    .unwrap();
    fs::write(root.join("reports/daily.sql"), "SELECT count(*) FROM v_orders;").unwrap();
    dir
}

#[test]
fn scan_builds_queryable_graph() {
    let dir = workspace();
    let manager = manager(dir.path(), 10);

    let report = manager.scan();
    assert_eq!(report.summary.parsed, 3);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.objects, 2);

    let lineage = manager.trace_lineage("orders", Direction::Downstream, 10).unwrap();
    let reached: Vec<(NodeKind, usize)> = lineage.steps.iter().map(|s| (s.node.kind, s.depth)).collect();
    assert_eq!(reached, vec![(NodeKind::View, 1), (NodeKind::File, 2)]);
    assert_eq!(lineage.steps[0].via.line, 3);

    let impact = manager.analyze_impact("orders", ChangeType::Drop).unwrap();
    assert_eq!(impact.direct_impacts.len(), 1);
    assert_eq!(impact.transitive_impacts.len(), 1);
    assert_eq!(impact.severity, ImpactSeverity::High);

    assert!(manager.detect_circular_dependencies().is_empty());
}

#[test]
fn rescan_drops_deleted_files() {
    let dir = workspace();
    let manager = manager(dir.path(), 10);
    manager.scan();

    fs::remove_file(dir.path().join("reports/daily.sql")).unwrap();
    manager.scan();

    let lineage = manager.trace_lineage("orders", Direction::Downstream, 10).unwrap();
    assert_eq!(lineage.steps.len(), 1);
    assert!(manager.source_file(&dir.path().join("reports/daily.sql")).is_none());
}

#[test]
fn unparsable_file_falls_back_and_is_reported_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.sql");
    fs::write(&path, "SELECT * FROM orders WHERE (").unwrap();
    let manager = manager(dir.path(), 10);

    let report = manager.scan();
    assert_eq!(report.summary.fallback, 1);
    assert!(manager.trace_lineage("orders", Direction::Downstream, 1).is_some());

    let reports = manager.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        codes(&reports[0]),
        vec![DiagnosticCode::SqlParseFallback, DiagnosticCode::MissingDefinition]
    );

    manager.enqueue(FileEvent::modified(&path));
    manager.process_pending();
    assert!(manager.take_status_reports().is_empty());

    fs::write(&path, "SELECT * FROM orders").unwrap();
    manager.enqueue(FileEvent::modified(&path));
    manager.process_pending();
    let reports = manager.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(codes(&reports[0]), vec![DiagnosticCode::MissingDefinition]);
    assert_eq!(manager.file_status(&path).unwrap().parse_status, Some(ParseStatus::Ok));
}

#[test]
fn io_failure_keeps_previous_contribution() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.sql");
    fs::write(&path, "SELECT * FROM orders").unwrap();
    let manager = manager(dir.path(), 10);
    manager.scan();
    assert_eq!(manager.take_status_reports().len(), 1);

    // Same path now names a directory: it exists but cannot be read
    fs::remove_file(&path).unwrap();
    fs::create_dir(&path).unwrap();
    manager.enqueue(FileEvent::modified(&path));
    manager.process_pending();

    assert!(manager.trace_lineage("orders", Direction::Downstream, 1).is_some());
    let status = manager.file_status(&path).unwrap();
    assert_eq!(status.state, QueueState::Done);
    assert_eq!(status.parse_status, Some(ParseStatus::Failed));
    assert!(status.error.is_some());
    assert_eq!(manager.source_file(&path).unwrap().status, ParseStatus::Failed);

    let reports = manager.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        codes(&reports[0]),
        vec![DiagnosticCode::IoFailure, DiagnosticCode::MissingDefinition]
    );
}

#[test]
fn scan_reports_missing_definitions() {
    let dir = workspace();
    let root = dir.path();
    fs::write(root.join("reports/weekly.sql"), "SELECT *\nFROM v_orders\nJOIN refunds ON true;").unwrap();
    let manager = manager(root, 10);

    let report = manager.scan();
    let missing: Vec<_> = report
        .diagnostics
        .iter()
        .filter(|d| d.code == DiagnosticCode::MissingDefinition)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Info);
    assert_eq!(missing[0].impact, vec!["refunds".to_string()]);
    assert_eq!(missing[0].location.as_ref().map(|l| l.line), Some(Some(3)));

    let reports = manager.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].path, root.join("reports/weekly.sql"));

    fs::write(root.join("ddl/refunds.sql"), "CREATE TABLE refunds (id INT);").unwrap();
    manager.scan();
    let reports = manager.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].diagnostics.is_empty());
}

#[test]
fn rename_moves_contribution() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old.sql");
    let new = dir.path().join("new.sql");
    fs::write(&old, "SELECT * FROM orders").unwrap();
    let manager = manager(dir.path(), 10);
    manager.scan();

    fs::rename(&old, &new).unwrap();
    manager.enqueue(FileEvent::renamed(&old, &new));
    assert_eq!(manager.process_pending(), 2);

    let node = manager.graph().read(|graph| graph.find_node("orders")).unwrap();
    assert_eq!(node.referenced_in, vec![new.clone()]);
    assert_eq!(manager.file_status(&old).unwrap().state, QueueState::Removed);
}

#[test]
fn repeated_events_collapse_to_last_write() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sql");
    let manager = manager(dir.path(), 10);

    manager.enqueue(FileEvent::modified(&path).with_content("SELECT * FROM first"));
    manager.enqueue(FileEvent::modified(&path).with_content("SELECT * FROM second"));
    manager.enqueue(FileEvent::modified(&path).with_content("SELECT * FROM third"));

    assert_eq!(manager.process_pending(), 1);
    let names: Vec<String> = manager.graph_snapshot().nodes.into_iter().map(|n| n.name).collect();
    assert!(names.contains(&"third".to_string()));
    assert!(!names.contains(&"first".to_string()));
}

#[tokio::test]
async fn worker_drains_after_debounce_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("live.sql");
    let manager = manager(dir.path(), 50);
    manager.start_worker();

    fs::write(&path, "SELECT * FROM events").unwrap();
    manager.enqueue(FileEvent::created(&path));

    let mut indexed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if manager.source_file(&path).is_some() {
            indexed = true;
            break;
        }
    }
    assert!(indexed, "worker never indexed the file");
    assert_eq!(manager.pending(), 0);

    manager.shutdown().await;

    // Events after shutdown stay queued
    manager.enqueue(FileEvent::modified(&path));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.pending(), 1);
}

#[test]
fn queries_stay_consistent_during_updates() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager(dir.path(), 10));
    let path = dir.path().join("hot.sql");

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..200 {
                    manager.graph().read(|graph| graph.check_invariants()).unwrap();
                    if let Some(lineage) = manager.trace_lineage("hot_source", Direction::Downstream, 10) {
                        assert!(lineage.steps.len() <= 1);
                    }
                }
            })
        })
        .collect();

    for i in 0..100 {
        let sql = if i % 2 == 0 {
            "CREATE VIEW hot AS SELECT * FROM hot_source"
        } else {
            "SELECT * FROM hot_source JOIN other ON true"
        };
        manager.enqueue(FileEvent::modified(&path).with_content(sql));
        manager.process_pending();
    }

    for reader in readers {
        reader.join().unwrap();
    }
}
