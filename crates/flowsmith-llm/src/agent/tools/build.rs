use async_trait::async_trait;
use flowsmith_core::GraphChange;
use flowsmith_core::catalog::missing_node_types;
use flowsmith_core::merge::{ProposedGraph, merge_graphs};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{graph_argument, node_types_or_skip, str_argument};
use crate::agent::AgentResult;
use crate::agent::registry::{ToolContext, ToolError, ToolHandler, ToolName, ToolOutput};

const DEFAULT_BUILD_MESSAGE: &str = "Workflow updated.";

/// Finalizes the proposed graph: merges it over the current workflow and lays
/// out new nodes.
pub struct BuildWorkflowTool;

#[async_trait]
impl ToolHandler for BuildWorkflowTool {
    fn name(&self) -> ToolName {
        ToolName::BuildWorkflow
    }

    fn is_final(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "Finalize the workflow. Pass the COMPLETE graph (all nodes to keep, including \
         unchanged ones, and all connections) plus a short message for the user. \
         Call validate_workflow first. Ends the conversation turn."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "graph": {
                    "type": "object",
                    "description": "Complete workflow: {nodes: [...], connections: [...]}"
                },
                "message": {
                    "type": "string",
                    "description": "Summary of the changes for the user"
                }
            },
            "required": ["graph", "message"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let graph = graph_argument(&args).ok_or_else(|| {
            ToolError::InvalidArguments("build_workflow requires a 'graph' object".to_string())
        })?;
        let (proposed, warnings) = ProposedGraph::from_value(&graph)
            .map_err(|e| ToolError::InvalidArguments(format!("build_workflow: {}", e)))?;
        for warning in &warnings {
            warn!("build_workflow: {}", warning);
        }

        let merged = merge_graphs(&proposed, ctx.current_workflow, ctx.contract);

        let missing = match node_types_or_skip(ctx, "missing node type detection").await {
            Some(types) => missing_node_types(&merged, &types),
            None => Vec::new(),
        };

        info!(
            nodes = merged.nodes.len(),
            connections = merged.connections.len(),
            missing = missing.len(),
            "Workflow built"
        );

        Ok(ToolOutput::Final(AgentResult {
            graph: GraphChange::Mutated { graph: merged },
            message: str_argument(&args, "message")
                .unwrap_or(DEFAULT_BUILD_MESSAGE)
                .to_string(),
            missing_node_types: missing,
            warnings,
            turn_limit_reached: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsmith_core::catalog::{
        NodeTypeDescription, StaticNodeTypeCatalog, UnavailableCatalog,
    };
    use flowsmith_core::executions::NoExecutionStore;
    use flowsmith_core::ports::ServicePortContract;
    use flowsmith_core::{Node, Position, WorkflowGraph};

    fn catalog() -> StaticNodeTypeCatalog {
        StaticNodeTypeCatalog::new(
            ["core.manualTrigger", "core.set"]
                .iter()
                .map(|id| NodeTypeDescription {
                    identifier: id.to_string(),
                    display_name: id.to_string(),
                    description: None,
                    properties: vec![],
                })
                .collect(),
        )
    }

    fn args() -> Value {
        json!({
            "graph": {
                "nodes": [
                    {"id": "A", "type": "core.manualTrigger", "name": "Start"},
                    {"id": "B", "type": "custom.slack", "name": "Notify"}
                ],
                "connections": [{"source": "A", "target": "B"}]
            },
            "message": "Added a Slack notification."
        })
    }

    #[tokio::test]
    async fn merges_over_existing_and_reports_missing_types() {
        let contract = ServicePortContract::builtin();
        let catalog = catalog();
        let existing = WorkflowGraph::new(
            vec![Node::new("A", "core.manualTrigger", "Start").at(0.0, 0.0)],
            vec![],
        );
        let ctx = ToolContext {
            request: "notify slack",
            current_workflow: Some(&existing),
            workflow_id: None,
            execution_context: None,
            catalog: &catalog,
            executions: &NoExecutionStore,
            contract: &contract,
        };

        let ToolOutput::Final(result) = BuildWorkflowTool.execute(args(), &ctx).await.unwrap()
        else {
            panic!("build_workflow must be final");
        };
        assert_eq!(result.message, "Added a Slack notification.");
        assert_eq!(result.missing_node_types, vec!["custom.slack"]);
        let graph = result.graph.graph().unwrap();
        assert_eq!(
            graph.find_node("B").unwrap().position,
            Some(Position { x: 300.0, y: 0.0 })
        );
        assert_eq!(graph.connections[0].source_output, "main");
    }

    #[tokio::test]
    async fn unavailable_registry_yields_empty_missing_set() {
        let contract = ServicePortContract::builtin();
        let ctx = ToolContext {
            request: "notify slack",
            current_workflow: None,
            workflow_id: None,
            execution_context: None,
            catalog: &UnavailableCatalog,
            executions: &NoExecutionStore,
            contract: &contract,
        };
        let ToolOutput::Final(result) = BuildWorkflowTool.execute(args(), &ctx).await.unwrap()
        else {
            panic!("build_workflow must be final");
        };
        assert!(result.missing_node_types.is_empty());
        assert!(!result.graph.is_no_change());
    }

    #[tokio::test]
    async fn missing_graph_is_invalid_arguments() {
        let contract = ServicePortContract::builtin();
        let ctx = ToolContext {
            request: "",
            current_workflow: None,
            workflow_id: None,
            execution_context: None,
            catalog: &UnavailableCatalog,
            executions: &NoExecutionStore,
            contract: &contract,
        };
        let err = BuildWorkflowTool
            .execute(json!({"message": "hi"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
