//! sqlweave Language Server Protocol host
//!
//! Keeps a live index of the workspace's SQL files and exposes the
//! dependency graph to the editor.
//!
//! ## Features
//!
//! - **Diagnostics**: pattern-extraction fallbacks and unreadable files
//! - **Hover**: definitions and consumers of the object under the cursor
//! - **Go-to-definition**: jump to the statement that creates an object
//! - **Commands**: graph snapshot, lineage, impact analysis and cycle detection
//!   through `workspace/executeCommand`
//!
//! ## Usage
//!
//! ```bash
//! sqlweave-lsp
//! ```

mod backend;
pub mod commands;

pub use backend::Backend;
pub use commands::{execute, CommandError, COMMANDS};
