use async_trait::async_trait;
use flowsmith_core::validate_proposal;
use serde_json::{Value, json};
use tracing::info;

use super::{graph_argument, node_types_or_skip};
use crate::agent::registry::{ToolContext, ToolError, ToolHandler, ToolName, ToolOutput};

/// Checks a candidate graph and returns findings for the model to act on.
pub struct ValidateWorkflowTool;

#[async_trait]
impl ToolHandler for ValidateWorkflowTool {
    fn name(&self) -> ToolName {
        ToolName::ValidateWorkflow
    }

    fn is_final(&self) -> bool {
        false
    }

    fn description(&self) -> &'static str {
        "Check a candidate workflow graph for structural problems (missing trigger, \
         wrong service ports, unwired required inputs, missing required parameters, \
         disconnected nodes). Returns errors, warnings and suggestions."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "graph": {
                    "type": "object",
                    "description": "Candidate workflow: {nodes: [...], connections: [...]}"
                }
            },
            "required": ["graph"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let graph = graph_argument(&args);
        let node_types = match graph {
            Some(_) => node_types_or_skip(ctx, "required parameter check").await,
            None => None,
        };

        let report = validate_proposal(graph.as_ref(), ctx.contract, node_types.as_deref());
        info!(
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Workflow validated"
        );

        let value = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        Ok(ToolOutput::Feedback(value))
    }
}
