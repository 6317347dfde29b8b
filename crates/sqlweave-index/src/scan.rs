//! Workspace discovery and parallel parsing
//!
//! Parsing is the only parallel phase. Results are handed back in path order
//! and queued by the caller, so they reach the graph through the same drain
//! as file events.

use crate::error::IndexError;
use rayon::prelude::*;
use sqlweave_core::{ExcludeFilter, IndexSettings, SourceFile};
use sqlweave_sql::{Extraction, ReferenceExtractor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Outcome of reading and extracting one file
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub result: Result<(SourceFile, Extraction), IndexError>,
}

/// Walk `root` for SQL files, honoring extensions and exclude patterns
///
/// Returned paths are `root`-joined and sorted. Fails only when an exclude
/// pattern does not compile.
pub fn discover_sql_files(root: &Path, settings: &IndexSettings) -> Result<Vec<PathBuf>, IndexError> {
    let excludes = settings.exclude_filter()?;
    Ok(discover_with(root, settings, &excludes))
}

/// Walk `root` with exclude patterns compiled once by the caller
pub(crate) fn discover_with(root: &Path, settings: &IndexSettings, excludes: &ExcludeFilter) -> Vec<PathBuf> {
    let relative = |path: &Path| -> String {
        path.strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    };

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !excludes.is_excluded(&relative(entry.path())))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && settings.is_sql_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    debug!(root = %root.display(), files = files.len(), "Discovered SQL files");
    files
}

/// Read and extract one file
pub fn parse_file(extractor: &ReferenceExtractor, path: &Path, content: Option<&str>) -> ParsedFile {
    let result = match content {
        Some(text) => Ok(extract(extractor, path, text.as_bytes())),
        None => std::fs::read(path)
            .map(|bytes| extract(extractor, path, &bytes))
            .map_err(|e| IndexError::io(path, &e)),
    };
    ParsedFile {
        path: path.to_path_buf(),
        result,
    }
}

fn extract(extractor: &ReferenceExtractor, path: &Path, bytes: &[u8]) -> (SourceFile, Extraction) {
    let extraction = extractor.extract_bytes(bytes, path, None);
    let source = SourceFile::new(path, extractor.default_dialect(), bytes, extraction.status);
    (source, extraction)
}

/// Parse files on a bounded pool
///
/// `max_workers` of `None` uses the available parallelism. Output order
/// matches `paths`.
pub fn parse_files(extractor: &ReferenceExtractor, paths: &[PathBuf], max_workers: Option<usize>) -> Vec<ParsedFile> {
    let threads = max_workers
        .filter(|n| *n > 0)
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

    let run = || -> Vec<ParsedFile> {
        paths
            .par_iter()
            .map(|path| parse_file(extractor, path, None))
            .collect()
    };

    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(run),
        Err(e) => {
            warn!(error = %e, "Falling back to the global thread pool");
            run()
        }
    }
}
