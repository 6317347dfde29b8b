//! LSP backend for sqlweave
//!
//! Document events feed the index update queue; a background task publishes
//! the diagnostics the index reports as files finish processing.

use crate::commands::{self, COMMANDS};
use sqlweave_core::{Config, Diagnostic as WeaveDiagnostic, Severity};
use sqlweave_graph::{EdgeKind, Node};
use sqlweave_index::{FileEvent, IndexManager};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::{Error as RpcError, Result};
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DidChangeTextDocumentParams, DidChangeWatchedFilesParams,
    DidChangeWatchedFilesRegistrationOptions, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, ExecuteCommandOptions, ExecuteCommandParams, FileChangeType,
    FileSystemWatcher, GlobPattern, GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverContents,
    HoverParams, HoverProviderCapability, InitializeParams, InitializeResult, InitializedParams, Location,
    MarkupContent, MarkupKind, MessageType, NumberOrString, OneOf, Position, Range, Registration,
    SaveOptions, ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions, TextDocumentSyncSaveOptions, Url,
};
use tower_lsp::{Client, LanguageServer};

/// How often pending status reports are flushed to the client
const PUBLISH_INTERVAL: Duration = Duration::from_millis(200);

pub struct Backend {
    client: Client,
    /// Set once `initialize` has built the index
    manager: Arc<RwLock<Option<Arc<IndexManager>>>>,
    /// Open documents (URI -> text), used to resolve the word under the cursor
    documents: Arc<RwLock<HashMap<Url, String>>>,
    stopping: Arc<AtomicBool>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            manager: Arc::new(RwLock::new(None)),
            documents: Arc::new(RwLock::new(HashMap::new())),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn manager(&self) -> Option<Arc<IndexManager>> {
        self.manager.read().await.clone()
    }

    async fn load_config(&self, root: &Path) -> Config {
        match Config::discover(root) {
            Ok(config) => config,
            Err(e) => {
                self.client
                    .log_message(MessageType::WARNING, format!("Using default config: {}", e))
                    .await;
                let mut config = Config::default();
                config.project_root = root.to_path_buf();
                config
            }
        }
    }

    /// Queue a document change, skipping files the index does not track
    async fn enqueue(&self, uri: &Url, event: impl FnOnce(PathBuf) -> FileEvent) {
        let Some(manager) = self.manager().await else {
            return;
        };
        let Ok(path) = uri.to_file_path() else {
            return;
        };
        if manager.config().index.is_sql_file(&path) {
            manager.enqueue(event(path));
        }
    }

    async fn document_text(&self, uri: &Url) -> Option<String> {
        if let Some(text) = self.documents.read().await.get(uri) {
            return Some(text.clone());
        }
        let path = uri.to_file_path().ok()?;
        tokio::fs::read_to_string(path).await.ok()
    }

    async fn node_at(&self, uri: &Url, position: Position) -> Option<(Arc<IndexManager>, Node)> {
        let manager = self.manager().await?;
        let text = self.document_text(uri).await?;
        let word = word_at(&text, position)?;
        let node = manager.graph().read(|graph| graph.find_node(&word))?;
        Some((manager, node))
    }

    async fn get_hover(&self, uri: &Url, position: Position) -> Option<Hover> {
        let (_, node) = self.node_at(uri, position).await?;
        Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: hover_markdown(&node),
            }),
            range: None,
        })
    }

    async fn get_definition(&self, uri: &Url, position: Position) -> Option<GotoDefinitionResponse> {
        let (manager, node) = self.node_at(uri, position).await?;

        let locations: Vec<Location> = manager.graph().read(|graph| {
            node.defined_in
                .iter()
                .filter_map(|file| {
                    let line = graph
                        .edges_for_file(file)
                        .into_iter()
                        .find(|edge| edge.kind == EdgeKind::Defines && edge.to == node.id)
                        .map(|edge| edge.line)
                        .unwrap_or(1);
                    Some(Location {
                        uri: Url::from_file_path(file).ok()?,
                        range: line_range(line),
                    })
                })
                .collect()
        });

        match locations.len() {
            0 => None,
            1 => locations.into_iter().next().map(GotoDefinitionResponse::Scalar),
            _ => Some(GotoDefinitionResponse::Array(locations)),
        }
    }

    async fn register_file_watchers(&self, manager: &IndexManager) {
        let watchers = manager
            .config()
            .index
            .extensions
            .iter()
            .map(|ext| FileSystemWatcher {
                glob_pattern: GlobPattern::String(format!("**/*.{}", ext)),
                kind: None,
            })
            .collect();
        let options = DidChangeWatchedFilesRegistrationOptions { watchers };

        let registration = match serde_json::to_value(options) {
            Ok(register_options) => Registration {
                id: "sqlweave-watched-files".to_string(),
                method: "workspace/didChangeWatchedFiles".to_string(),
                register_options: Some(register_options),
            },
            Err(e) => {
                tracing::warn!("Failed to encode watcher registration: {}", e);
                return;
            }
        };

        if let Err(e) = self.client.register_capability(vec![registration]).await {
            tracing::debug!("Client declined file watcher registration: {}", e);
        }
    }

    /// Forward index status reports to the client until shutdown
    fn spawn_publisher(&self, manager: Arc<IndexManager>) {
        let client = self.client.clone();
        let stopping = Arc::clone(&self.stopping);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PUBLISH_INTERVAL);
            while !stopping.load(Ordering::SeqCst) {
                interval.tick().await;
                for report in manager.take_status_reports() {
                    let Ok(uri) = Url::from_file_path(&report.path) else {
                        continue;
                    };
                    let diagnostics = report.diagnostics.into_iter().map(convert_diagnostic).collect();
                    client.publish_diagnostics(uri, diagnostics, None).await;
                }
            }
        });
    }
}

/// Convert a sqlweave diagnostic to an LSP diagnostic spanning its line
pub(crate) fn convert_diagnostic(diag: WeaveDiagnostic) -> Diagnostic {
    let severity = match diag.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warn => DiagnosticSeverity::WARNING,
        Severity::Info => DiagnosticSeverity::INFORMATION,
    };
    let line = diag.location.as_ref().and_then(|loc| loc.line).unwrap_or(1);

    Diagnostic {
        range: line_range(line),
        severity: Some(severity),
        code: Some(NumberOrString::String(diag.code.as_str().to_string())),
        source: Some("sqlweave".to_string()),
        message: diag.message,
        ..Default::default()
    }
}

/// Whole-line range for a 1-indexed line
fn line_range(line: usize) -> Range {
    let line = line.saturating_sub(1) as u32;
    Range {
        start: Position { line, character: 0 },
        end: Position {
            line: line + 1,
            character: 0,
        },
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$')
}

/// Possibly-qualified identifier under the cursor, with quotes stripped
pub(crate) fn word_at(text: &str, position: Position) -> Option<String> {
    let line: Vec<char> = text.lines().nth(position.line as usize)?.chars().collect();
    let cursor = (position.character as usize).min(line.len());

    let mut start = cursor;
    while start > 0 && (is_name_char(line[start - 1]) || matches!(line[start - 1], '"' | '`' | '[' | ']')) {
        start -= 1;
    }
    let mut end = cursor;
    while end < line.len() && (is_name_char(line[end]) || matches!(line[end], '"' | '`' | '[' | ']')) {
        end += 1;
    }

    let word: String = line[start..end]
        .iter()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect();
    let word = word.trim_matches('.');
    if word.is_empty() || word.chars().all(|c| c.is_ascii_digit()) {
        None
    } else {
        Some(word.to_string())
    }
}

fn hover_markdown(node: &Node) -> String {
    let mut markdown = format!("**{}** ({})\n", node.name, node.kind);
    if node.missing_definition {
        markdown.push_str("\n_Not defined in this workspace_\n");
    }
    for (title, files) in [("Defined in", &node.defined_in), ("Referenced in", &node.referenced_in)] {
        if files.is_empty() {
            continue;
        }
        markdown.push_str(&format!("\n{}:\n", title));
        for file in files.iter() {
            markdown.push_str(&format!("- `{}`\n", file.display()));
        }
    }
    markdown
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let root = params
            .root_uri
            .as_ref()
            .and_then(|uri| uri.to_file_path().ok())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();

        let config = self.load_config(&root).await;
        let manager = IndexManager::new(config).map_err(|e| {
            tracing::error!("Failed to set up the index: {}", e);
            RpcError::invalid_params(e.to_string())
        })?;
        let manager = Arc::new(manager);

        let scanning = Arc::clone(&manager);
        match tokio::task::spawn_blocking(move || scanning.scan()).await {
            Ok(report) => {
                self.client
                    .log_message(
                        MessageType::INFO,
                        format!(
                            "Indexed {} files: {} objects, {} edges",
                            report.files.len(),
                            report.summary.objects,
                            report.summary.edges
                        ),
                    )
                    .await;
            }
            Err(e) => tracing::error!("Initial scan failed: {}", e),
        }

        manager.start_worker();
        *self.manager.write().await = Some(manager);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(true),
                    })),
                    ..Default::default()
                })),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: COMMANDS.iter().map(|c| c.to_string()).collect(),
                    work_done_progress_options: Default::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "sqlweave".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        if let Some(manager) = self.manager().await {
            self.register_file_watchers(&manager).await;
            self.spawn_publisher(manager);
        }
        self.client
            .log_message(MessageType::INFO, "sqlweave language server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(manager) = self.manager().await {
            manager.shutdown().await;
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        self.documents.write().await.insert(uri.clone(), text.clone());
        self.enqueue(&uri, |path| FileEvent::modified(path).with_content(text)).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        // Full sync: the last change carries the whole document
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.documents.write().await.insert(uri.clone(), change.text.clone());
        self.enqueue(&uri, |path| FileEvent::modified(path).with_content(change.text))
            .await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        match params.text {
            Some(text) => {
                self.documents.write().await.insert(uri.clone(), text.clone());
                self.enqueue(&uri, |path| FileEvent::modified(path).with_content(text)).await;
            }
            None => self.enqueue(&uri, FileEvent::modified).await,
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.documents.write().await.remove(&uri);
        // Fall back to the on-disk contents for unsaved edits
        self.enqueue(&uri, FileEvent::modified).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        for change in params.changes {
            let event: fn(PathBuf) -> FileEvent = match change.typ {
                FileChangeType::CREATED => FileEvent::created,
                FileChangeType::CHANGED => FileEvent::modified,
                FileChangeType::DELETED => FileEvent::deleted,
                _ => continue,
            };
            self.enqueue(&change.uri, event).await;
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self.get_hover(&uri, position).await)
    }

    async fn goto_definition(&self, params: GotoDefinitionParams) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;

        Ok(self.get_definition(&uri, position).await)
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<serde_json::Value>> {
        let Some(manager) = self.manager().await else {
            return Err(RpcError::invalid_params("workspace is not indexed yet"));
        };
        commands::execute(&manager, &params.command, &params.arguments)
            .map(Some)
            .map_err(|e| RpcError::invalid_params(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlweave_core::DiagnosticCode;
    use sqlweave_graph::{NodeId, NodeKind};

    fn at(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn test_word_at_cursor() {
        let text = "SELECT *\nFROM analytics.orders o\nJOIN \"Customers\" c ON true";

        assert_eq!(word_at(text, at(1, 8)), Some("analytics.orders".to_string()));
        assert_eq!(word_at(text, at(1, 5)), Some("analytics.orders".to_string()));
        assert_eq!(word_at(text, at(2, 8)), Some("Customers".to_string()));
        assert_eq!(word_at(text, at(0, 7)), None);
        assert_eq!(word_at(text, at(9, 0)), None);
    }

    #[test]
    fn test_convert_diagnostic_uses_zero_based_line() {
        let diag = WeaveDiagnostic::new(
            DiagnosticCode::SqlParseFallback,
            Severity::Warn,
            "Used pattern extraction: unexpected token",
        )
        .with_location(sqlweave_core::Location::with_line("a.sql", 3));

        let converted = convert_diagnostic(diag);
        assert_eq!(converted.severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(converted.range.start, at(2, 0));
        assert_eq!(converted.source.as_deref(), Some("sqlweave"));
    }

    #[test]
    fn test_hover_lists_files() {
        let node = Node {
            id: NodeId::object("orders"),
            name: "orders".to_string(),
            kind: NodeKind::Table,
            defined_in: vec![PathBuf::from("ddl/orders.sql")],
            referenced_in: vec![PathBuf::from("views/a.sql"), PathBuf::from("views/b.sql")],
            missing_definition: false,
        };

        let markdown = hover_markdown(&node);
        assert!(markdown.starts_with("**orders** (table)"));
        assert!(markdown.contains("Defined in:\n- `ddl/orders.sql`"));
        assert!(markdown.contains("- `views/b.sql`"));
        assert!(!markdown.contains("Not defined"));
    }
}
