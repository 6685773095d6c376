mod advise;
mod build;
mod logs;
mod validate;

pub use advise::AdviseUserTool;
pub use build::BuildWorkflowTool;
pub use logs::{
    ExecutionContext, ExecutionError, ExecutionLogReport, GetLatestExecutionLogsTool, LogSource,
    NodeErrorReport,
};
pub use validate::ValidateWorkflowTool;

use flowsmith_core::catalog::NodeTypeDescription;
use serde_json::Value;
use tracing::warn;

use super::registry::ToolContext;

/// The `graph` argument. Some models send it JSON-encoded as a string.
pub(crate) fn graph_argument(args: &Value) -> Option<Value> {
    match args.get("graph")? {
        Value::Null => None,
        Value::String(text) => serde_json::from_str(text).ok(),
        other => Some(other.clone()),
    }
}

/// Non-empty string argument.
pub(crate) fn str_argument<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// List node types, logging and returning `None` when the registry is unreachable.
pub(crate) async fn node_types_or_skip(
    ctx: &ToolContext<'_>,
    purpose: &str,
) -> Option<Vec<NodeTypeDescription>> {
    match ctx.catalog.list_node_types().await {
        Ok(types) => Some(types),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Node type registry unavailable; skipping {}", purpose);
            None
        }
    }
}
