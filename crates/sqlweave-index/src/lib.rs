//! Workspace indexing
//!
//! The index manager owns the set of indexed files and the dependency graph.
//! File events and scans feed one update queue: scans parse in parallel and
//! queue their results, and a single drain applies them in order. A debounced
//! background worker drains the queue as file events arrive.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = IndexManager::new(Config::discover(root)?)?;
//! let report = manager.scan();
//! manager.start_worker();
//!
//! manager.enqueue(FileEvent::modified(path));
//! let lineage = manager.trace_lineage("orders", Direction::Downstream, 10);
//!
//! manager.shutdown().await;
//! ```

pub mod error;
pub mod manager;
pub mod queue;
pub mod scan;
pub mod status;

pub use error::{IndexError, IndexErrorKind};
pub use manager::IndexManager;
pub use queue::{FileEvent, FileEventKind, QueueItem, UpdateQueue, Work};
pub use scan::{discover_sql_files, ParsedFile};
pub use status::{FileStatus, QueueState, StatusReport};
