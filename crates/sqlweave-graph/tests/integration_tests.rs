//! Integration tests for the dependency graph

use pretty_assertions::assert_eq;
use sqlweave_core::{Definition, DefinitionKind, Reference};
use sqlweave_graph::{DependencyGraph, Direction, EdgeKind, LineageAnalyzer, NodeId, NodeKind, SharedGraph};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn refs(file: &str, consumer: Option<&str>, names: &[&str]) -> Vec<Reference> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Reference::new(*name, file, i + 1, 0).with_consumer(consumer.map(str::to_string)))
        .collect()
}

#[test]
fn view_chain_lineage_through_files() {
    let mut graph = DependencyGraph::new();
    graph.apply_file_result(
        Path::new("ddl/orders.sql"),
        &[],
        &[Definition::new("orders", DefinitionKind::Table, "ddl/orders.sql", 1)],
    );
    graph.apply_file_result(
        Path::new("views/v_orders.sql"),
        &refs("views/v_orders.sql", Some("v_orders"), &["orders"]),
        &[Definition::new("v_orders", DefinitionKind::View, "views/v_orders.sql", 1)],
    );
    graph.apply_file_result(
        Path::new("reports/daily.sql"),
        &refs("reports/daily.sql", None, &["v_orders"]),
        &[],
    );

    let steps = LineageAnalyzer::new(&graph).trace(&NodeId::object("orders"), Direction::Downstream, 10);
    let reached: Vec<(NodeKind, String, usize)> = steps
        .iter()
        .map(|s| (s.node.kind, s.node.name.clone(), s.depth))
        .collect();
    assert_eq!(
        reached,
        vec![
            (NodeKind::View, "v_orders".to_string(), 1),
            (NodeKind::File, "reports/daily.sql".to_string(), 2),
        ]
    );

    let kinds: Vec<EdgeKind> = graph
        .edges_for_file(Path::new("views/v_orders.sql"))
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EdgeKind::References, EdgeKind::Defines]);
    assert!(graph.check_invariants().is_ok());
}

#[test]
fn snapshot_is_independent_of_apply_order() {
    let files: Vec<(&str, Vec<Reference>, Vec<Definition>)> = vec![
        ("a.sql", refs("a.sql", None, &["t1", "t2"]), vec![]),
        (
            "b.sql",
            refs("b.sql", Some("v"), &["t2"]),
            vec![Definition::new("v", DefinitionKind::View, "b.sql", 1)],
        ),
        (
            "c.sql",
            vec![],
            vec![Definition::new("s.t1", DefinitionKind::Table, "c.sql", 1)],
        ),
    ];

    let mut forward = DependencyGraph::new();
    for (path, references, definitions) in &files {
        forward.apply_file_result(Path::new(path), references, definitions);
    }
    let mut backward = DependencyGraph::new();
    for (path, references, definitions) in files.iter().rev() {
        backward.apply_file_result(Path::new(path), references, definitions);
    }

    assert_eq!(forward.snapshot(), backward.snapshot());
    assert!(forward.find_node("t1").is_some_and(|n| n.name == "s.t1"));
}

#[test]
fn snapshot_serializes() {
    let mut graph = DependencyGraph::new();
    graph.apply_file_result(Path::new("q.sql"), &refs("q.sql", None, &["orders"]), &[]);

    let json = graph.snapshot().to_json().unwrap();
    assert!(json.contains("\"missing_definition\": true"));
    assert!(json.contains("\"kind\": \"references\""));
}

#[test]
fn readers_never_observe_partial_contributions() {
    let shared = SharedGraph::new();
    let path = Path::new("hot.sql");
    let version_a = refs("hot.sql", None, &["a1", "a2", "a3"]);
    let version_b = refs("hot.sql", None, &["b1", "b2", "b3", "b4"]);
    shared.apply_file_result(path, &version_a, &[]);

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let shared = shared.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let targets: Vec<String> = shared.read(|graph| {
                        graph
                            .edges_for_file(Path::new("hot.sql"))
                            .into_iter()
                            .map(|e| e.to.to_string())
                            .collect()
                    });
                    let all_a = targets.len() == 3 && targets.iter().all(|t| t.starts_with('a'));
                    let all_b = targets.len() == 4 && targets.iter().all(|t| t.starts_with('b'));
                    assert!(all_a || all_b, "partial contribution observed: {:?}", targets);
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for i in 0..500 {
        let version = if i % 2 == 0 { &version_b } else { &version_a };
        shared.apply_file_result(path, version, &[]);
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    assert!(shared.read(|graph| graph.check_invariants()).is_ok());
}
