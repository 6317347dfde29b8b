//! Index manager
//!
//! One manager per workspace session. It owns the indexed file table, the
//! shared dependency graph, the update queue and the background worker that
//! drains it. Scans and file events both end up as queue items, and only one
//! drain runs at a time. Each item is applied inside a single graph write
//! section that also updates the file table and the status board, so readers
//! never see one without the other.

use crate::error::IndexError;
use crate::queue::{FileEvent, FileEventKind, QueueItem, UpdateQueue, Work};
use crate::scan::{discover_with, parse_file, parse_files, ParsedFile};
use crate::status::{missing_definition, FileStatus, QueueState, StatusBoard, StatusReport};
use sqlweave_core::{Config, Diagnostic, ExcludeFilter, IndexReport, ParseStatus, SourceFile};
use sqlweave_engine::{ChangeType, ImpactAnalyzer, ImpactReport};
use sqlweave_graph::{
    Cycle, DependencyGraph, Direction, GraphSnapshot, Lineage, LineageAnalyzer, NodeKind, SharedGraph,
};
use sqlweave_sql::ReferenceExtractor;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the manager handle and its worker
///
/// Lock order: graph, then files, then status. The queue lock is never held
/// while taking any of the others.
struct Shared {
    config: Config,
    extractor: ReferenceExtractor,
    excludes: ExcludeFilter,
    graph: SharedGraph,
    files: RwLock<BTreeMap<PathBuf, SourceFile>>,
    status: Mutex<StatusBoard>,
    queue: Mutex<UpdateQueue>,
    draining: Mutex<()>,
    wake: Notify,
    stopping: AtomicBool,
}

impl Shared {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Apply one parse result in a single write section
    fn apply(&self, parsed: ParsedFile) {
        let ParsedFile { path, result } = parsed;

        self.graph.write(|graph| match result {
            Ok((source, extraction)) => {
                graph.apply_file_result(&path, &extraction.references, &extraction.definitions);
                if let Some(reason) = &extraction.parse_error {
                    debug!(file = %path.display(), reason = %reason, "Indexed with pattern extraction");
                }

                let status = source.status;
                write(&self.files).insert(path.clone(), source);
                lock(&self.status).finish(&path, Some(status), extraction.fallback_diagnostic(&path));
            }
            Err(error) if error.is_unavailable() => {
                debug!(file = %path.display(), "File vanished before indexing; removing");
                self.detach(graph, &path);
            }
            Err(error) => {
                warn!(file = %path.display(), error = %error, "Failed to index file; keeping previous contribution");
                write(&self.files)
                    .entry(path.clone())
                    .or_insert_with(|| {
                        SourceFile::new(&path, self.extractor.default_dialect(), &[], ParseStatus::Failed)
                    })
                    .status = ParseStatus::Failed;
                lock(&self.status).finish(&path, Some(ParseStatus::Failed), Some(error.to_diagnostic()));
            }
        });
    }

    fn remove(&self, path: &Path) {
        self.graph.write(|graph| self.detach(graph, path));
    }

    /// Drop a path everywhere; the caller holds the graph write lock
    fn detach(&self, graph: &mut DependencyGraph, path: &Path) {
        graph.remove_file(path);
        write(&self.files).remove(path);
        lock(&self.status).remove(path);
    }

    fn process(&self, item: QueueItem) {
        let QueueItem { path, work } = item;
        lock(&self.status).set_state(&path, QueueState::Verifying);

        let content = match work {
            Work::Remove => {
                debug!(file = %path.display(), "No longer part of the workspace");
                self.remove(&path);
                return;
            }
            Work::Parsed(parsed) => {
                lock(&self.status).set_state(&path, QueueState::Indexing);
                self.apply(*parsed);
                return;
            }
            Work::Index { content } => content,
        };

        if content.is_none() {
            if let Err(e) = std::fs::metadata(&path) {
                if e.kind() == std::io::ErrorKind::NotFound {
                    debug!(file = %path.display(), "File no longer exists");
                    self.remove(&path);
                    return;
                }
            }
        }

        lock(&self.status).set_state(&path, QueueState::Indexing);
        let parsed = parse_file(&self.extractor, &path, content.as_deref());
        self.apply(parsed);
    }

    /// Process queued items until the queue is empty
    ///
    /// Only one drain runs at a time, so items for the same path are applied
    /// in the order they were queued. With `interruptible`, a shutdown
    /// request stops the drain after the current item.
    fn drain(&self, interruptible: bool) -> usize {
        let _draining = lock(&self.draining);
        let mut processed = 0;
        while !(interruptible && self.is_stopping()) {
            let Some(item) = lock(&self.queue).pop() else {
                break;
            };
            self.process(item);
            processed += 1;
        }
        if processed > 0 {
            self.publish_status();
        }
        processed
    }

    /// Recompute missing-definition diagnostics for every indexed file and
    /// queue reports for the files whose diagnostics changed
    fn publish_status(&self) {
        self.graph.read(|graph| {
            let mut missing: HashMap<PathBuf, Vec<Diagnostic>> = HashMap::new();
            for edge in graph.unresolved_references() {
                let diagnostics = missing.entry(edge.file.clone()).or_default();
                let diagnostic = missing_definition(&edge);
                if diagnostics.last() != Some(&diagnostic) {
                    diagnostics.push(diagnostic);
                }
            }

            let files = read(&self.files);
            let mut status = lock(&self.status);
            for path in files.keys() {
                status.publish(path, missing.remove(path).unwrap_or_default());
            }
        });
    }
}

/// Indexes a workspace and answers graph queries
pub struct IndexManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexManager {
    pub fn new(config: Config) -> Result<Self, IndexError> {
        let extractor = ReferenceExtractor::from_config(&config)?;
        let excludes = config.index.exclude_filter()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                extractor,
                excludes,
                graph: SharedGraph::new(),
                files: RwLock::new(BTreeMap::new()),
                status: Mutex::new(StatusBoard::default()),
                queue: Mutex::new(UpdateQueue::new()),
                draining: Mutex::new(()),
                wake: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn root(&self) -> &Path {
        &self.shared.config.project_root
    }

    /// Handle to the live graph
    pub fn graph(&self) -> SharedGraph {
        self.shared.graph.clone()
    }

    /// Full workspace scan
    ///
    /// Files indexed earlier that are no longer found are removed.
    pub fn scan(&self) -> IndexReport {
        let started = Instant::now();
        let generations = lock(&self.shared.queue).generations();
        let paths = discover_with(self.root(), &self.shared.config.index, &self.shared.excludes);

        let found: BTreeSet<&PathBuf> = paths.iter().collect();
        let stale: Vec<PathBuf> = read(&self.shared.files)
            .keys()
            .filter(|path| !found.contains(path))
            .cloned()
            .collect();

        self.index_paths(&paths, stale, &generations, started)
    }

    /// Cold start from an explicit file list
    ///
    /// Parsing runs on a bounded `rayon` pool; the results are queued and
    /// drained in path order.
    pub fn index_files(&self, paths: &[PathBuf]) -> IndexReport {
        let started = Instant::now();
        let generations = lock(&self.shared.queue).generations();
        self.index_paths(paths, Vec::new(), &generations, started)
    }

    fn index_paths(
        &self,
        paths: &[PathBuf],
        stale: Vec<PathBuf>,
        generations: &HashMap<PathBuf, u64>,
        started: Instant,
    ) -> IndexReport {
        let parsed = parse_files(&self.shared.extractor, paths, self.shared.config.index.max_workers);
        let queued = self.queue_scan_results(generations, stale, parsed);
        let processed = self.shared.drain(false);
        debug!(queued, processed, "Applied scan results");

        self.report(paths, started)
    }

    /// Queue scan work, skipping paths pushed since `generations` was taken
    fn queue_scan_results(
        &self,
        generations: &HashMap<PathBuf, u64>,
        stale: Vec<PathBuf>,
        parsed: Vec<ParsedFile>,
    ) -> usize {
        let seen = |path: &Path| generations.get(path).copied().unwrap_or(0);
        let mut queue = lock(&self.shared.queue);

        let removals = stale.into_iter().map(|path| (path, Work::Remove));
        let results = parsed
            .into_iter()
            .map(|file| (file.path.clone(), Work::Parsed(Box::new(file))));

        let mut queued = 0;
        for (path, work) in removals.chain(results) {
            let generation = seen(&path);
            if queue.push_scanned(path.clone(), generation, work) {
                queued += 1;
            } else {
                debug!(file = %path.display(), "Newer update pending; dropping scan result");
            }
        }
        queued
    }

    fn report(&self, paths: &[PathBuf], started: Instant) -> IndexReport {
        let (files, diagnostics, objects, edges) = self.shared.graph.read(|graph| {
            let table = read(&self.shared.files);
            let status = lock(&self.shared.status);

            let files: Vec<SourceFile> = paths.iter().filter_map(|path| table.get(path).cloned()).collect();
            let mut diagnostics: Vec<Diagnostic> = paths
                .iter()
                .flat_map(|path| status.published(path).iter().cloned())
                .collect();
            diagnostics.extend(graph.detect_circular_dependencies().iter().map(Cycle::to_diagnostic));

            if let Err(e) = graph.check_invariants() {
                warn!(error = %e, "Dependency graph failed its consistency check");
                diagnostics.push(e.to_diagnostic());
            }

            let objects = graph
                .all_nodes()
                .iter()
                .filter(|node| node.kind != NodeKind::File)
                .count();
            (files, diagnostics, objects, graph.edge_count())
        });

        info!(
            files = files.len(),
            objects,
            edges,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Indexed workspace"
        );
        IndexReport::new(files, diagnostics, objects, edges)
    }

    /// Queue a file event for the background worker
    pub fn enqueue(&self, event: FileEvent) {
        {
            let mut status = lock(&self.shared.status);
            if let FileEventKind::Renamed { from } = &event.kind {
                status.set_state(from, QueueState::Queued);
            }
            status.set_state(&event.path, QueueState::Queued);
        }
        lock(&self.shared.queue).push_event(event);
        self.shared.wake.notify_one();
    }

    /// Number of paths waiting to be processed
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Drain the queue on the calling thread
    pub fn process_pending(&self) -> usize {
        self.shared.drain(false)
    }
    /// Spawn the debounced background worker on the current tokio runtime
    ///
    /// The worker drains the queue once no event has arrived for
    /// `index.debounce_ms`. Calling this twice has no effect.
    pub fn start_worker(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.shared))));
    }

    /// Stop the worker after the file it is currently processing
    pub async fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Update worker ended abnormally");
            }
        }
    }

    pub fn graph_snapshot(&self) -> GraphSnapshot {
        self.shared.graph.snapshot()
    }

    pub fn trace_lineage(&self, node: &str, direction: Direction, max_depth: usize) -> Option<Lineage> {
        self.shared
            .graph
            .read(|graph| LineageAnalyzer::new(graph).lineage(node, direction, max_depth))
    }

    pub fn analyze_impact(&self, node: &str, change: ChangeType) -> Option<ImpactReport> {
        let max_depth = self.shared.config.analysis.max_depth;
        self.shared.graph.read(|graph| {
            ImpactAnalyzer::new(graph)
                .with_max_depth(max_depth)
                .analyze_name(node, change)
        })
    }

    pub fn detect_circular_dependencies(&self) -> Vec<Cycle> {
        self.shared.graph.detect_circular_dependencies()
    }

    pub fn file_status(&self, path: &Path) -> Option<FileStatus> {
        lock(&self.shared.status).get(path)
    }

    /// Diagnostics that changed since the last call
    pub fn take_status_reports(&self) -> Vec<StatusReport> {
        lock(&self.shared.status).take_reports()
    }

    pub fn source_file(&self, path: &Path) -> Option<SourceFile> {
        self.shared
            .graph
            .read(|_| read(&self.shared.files).get(path).cloned())
    }

    pub fn indexed_files(&self) -> Vec<SourceFile> {
        self.shared
            .graph
            .read(|_| read(&self.shared.files).values().cloned().collect())
    }
}

async fn run_worker(shared: Arc<Shared>) {
    let debounce = Duration::from_millis(shared.config.index.debounce_ms);
    info!(debounce_ms = shared.config.index.debounce_ms, "Update worker started");

    loop {
        shared.wake.notified().await;
        if shared.is_stopping() {
            break;
        }

        // Wait for a quiet period; every new event restarts the timer
        let quiet = loop {
            tokio::select! {
                _ = shared.wake.notified() => {
                    if shared.is_stopping() {
                        break false;
                    }
                }
                _ = tokio::time::sleep(debounce) => break true,
            }
        };
        if !quiet {
            break;
        }

        let worker = Arc::clone(&shared);
        match tokio::task::spawn_blocking(move || worker.drain(true)).await {
            Ok(processed) => debug!(processed, "Drained update queue"),
            Err(e) => warn!(error = %e, "Update batch panicked"),
        }
        if shared.is_stopping() {
            break;
        }
    }

    info!("Update worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlweave_core::DiagnosticCode;
    use std::fs;
    use tempfile::TempDir;

    fn manager(root: &Path) -> IndexManager {
        let mut config = Config::default();
        config.project_root = root.to_path_buf();
        IndexManager::new(config).unwrap()
    }

    #[test]
    fn test_enqueue_marks_queued() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let path = dir.path().join("a.sql");

        manager.enqueue(FileEvent::modified(&path));
        assert_eq!(manager.pending(), 1);
        assert_eq!(manager.file_status(&path).unwrap().state, QueueState::Queued);
    }

    #[test]
    fn test_missing_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let path = dir.path().join("a.sql");
        fs::write(&path, "SELECT * FROM orders").unwrap();

        manager.enqueue(FileEvent::created(&path));
        manager.process_pending();
        assert_eq!(manager.graph_snapshot().edges.len(), 1);

        fs::remove_file(&path).unwrap();
        manager.enqueue(FileEvent::modified(&path));
        manager.process_pending();

        assert!(manager.graph_snapshot().nodes.is_empty());
        assert!(manager.source_file(&path).is_none());
        assert_eq!(manager.file_status(&path).unwrap().state, QueueState::Removed);
    }

    #[test]
    fn test_supplied_content_wins_over_disk() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let path = dir.path().join("a.sql");
        fs::write(&path, "SELECT * FROM on_disk").unwrap();

        manager.enqueue(FileEvent::modified(&path).with_content("SELECT * FROM in_buffer"));
        manager.process_pending();

        assert!(manager.trace_lineage("in_buffer", Direction::Downstream, 1).is_some());
        assert!(manager.trace_lineage("on_disk", Direction::Downstream, 1).is_none());
    }

    #[test]
    fn test_scan_results_yield_to_newer_events() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let path = dir.path().join("a.sql");
        let gone = dir.path().join("gone.sql");
        fs::write(&path, "SELECT * FROM on_disk").unwrap();

        // A scan snapshots generations, then an editor event lands before
        // the scan hands back its results
        let generations = lock(&manager.shared.queue).generations();
        let parsed = vec![parse_file(&manager.shared.extractor, &path, None)];
        manager.enqueue(FileEvent::modified(&path).with_content("SELECT * FROM in_buffer"));
        manager.enqueue(FileEvent::modified(&gone).with_content("SELECT * FROM kept"));
        manager.process_pending();

        let queued = manager.queue_scan_results(&generations, vec![gone.clone()], parsed);
        assert_eq!(queued, 0);
        assert_eq!(manager.process_pending(), 0);

        assert!(manager.trace_lineage("in_buffer", Direction::Downstream, 1).is_some());
        assert!(manager.trace_lineage("on_disk", Direction::Downstream, 1).is_none());
        assert!(manager.source_file(&gone).is_some());
    }

    #[test]
    fn test_missing_definitions_are_reported_until_defined() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let report = dir.path().join("report.sql");
        let model = dir.path().join("orders.sql");

        manager.enqueue(FileEvent::created(&report).with_content("SELECT * FROM orders"));
        manager.process_pending();

        let reports = manager.take_status_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].path, report);
        let codes: Vec<_> = reports[0].diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::MissingDefinition]);

        manager.enqueue(FileEvent::created(&model).with_content("CREATE TABLE orders (id INT)"));
        manager.process_pending();

        let reports = manager.take_status_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].path, report);
        assert!(reports[0].diagnostics.is_empty());
    }
}
