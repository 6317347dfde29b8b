//! `workspace/executeCommand` handlers
//!
//! Arguments are positional JSON values:
//!
//! | command | arguments |
//! |---|---|
//! | `sqlweave.graphSnapshot` | none |
//! | `sqlweave.traceLineage` | node, direction (`upstream`), depth (`analysis.max_depth`) |
//! | `sqlweave.analyzeImpact` | node, change (`modify`) |
//! | `sqlweave.exportImpactMarkdown` | node, change (`modify`) |
//! | `sqlweave.detectCycles` | none |

use serde_json::Value;
use sqlweave_engine::{ChangeType, ImpactExport};
use sqlweave_graph::Direction;
use sqlweave_index::IndexManager;
use thiserror::Error;

pub const GRAPH_SNAPSHOT: &str = "sqlweave.graphSnapshot";
pub const TRACE_LINEAGE: &str = "sqlweave.traceLineage";
pub const ANALYZE_IMPACT: &str = "sqlweave.analyzeImpact";
pub const EXPORT_IMPACT_MARKDOWN: &str = "sqlweave.exportImpactMarkdown";
pub const DETECT_CYCLES: &str = "sqlweave.detectCycles";

/// Commands advertised to the client
pub const COMMANDS: [&str; 5] = [
    GRAPH_SNAPSHOT,
    TRACE_LINEAGE,
    ANALYZE_IMPACT,
    EXPORT_IMPACT_MARKDOWN,
    DETECT_CYCLES,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Serialization(e.to_string()))
}

fn node_arg(args: &[Value]) -> Result<String, CommandError> {
    args.first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CommandError::InvalidArgument("expected a node name as the first argument".to_string()))
}

fn parsed_arg<T: std::str::FromStr<Err = String>>(args: &[Value], index: usize, default: T) -> Result<T, CommandError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(text)) => text.parse().map_err(CommandError::InvalidArgument),
        Some(other) => Err(CommandError::InvalidArgument(format!("unexpected argument {}", other))),
    }
}

/// Run a command against the index
pub fn execute(manager: &IndexManager, command: &str, args: &[Value]) -> Result<Value, CommandError> {
    match command {
        GRAPH_SNAPSHOT => to_value(&manager.graph_snapshot()),
        TRACE_LINEAGE => {
            let node = node_arg(args)?;
            let direction = parsed_arg(args, 1, Direction::Upstream)?;
            let depth = match args.get(2) {
                None | Some(Value::Null) => manager.config().analysis.max_depth,
                Some(value) => value
                    .as_u64()
                    .map(|depth| depth as usize)
                    .ok_or_else(|| CommandError::InvalidArgument(format!("invalid depth {}", value)))?,
            };
            let lineage = manager
                .trace_lineage(&node, direction, depth)
                .ok_or(CommandError::NodeNotFound(node))?;
            to_value(&lineage)
        }
        ANALYZE_IMPACT | EXPORT_IMPACT_MARKDOWN => {
            let node = node_arg(args)?;
            let change = parsed_arg(args, 1, ChangeType::Modify)?;
            let report = manager
                .analyze_impact(&node, change)
                .ok_or(CommandError::NodeNotFound(node))?;
            if command == ANALYZE_IMPACT {
                to_value(&report)
            } else {
                Ok(Value::String(ImpactExport::new(report).to_markdown()))
            }
        }
        DETECT_CYCLES => to_value(&manager.detect_circular_dependencies()),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    }
}
