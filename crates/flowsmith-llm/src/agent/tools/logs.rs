use async_trait::async_trait;
use flowsmith_core::WorkflowGraph;
use flowsmith_core::executions::ExecutionRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::str_argument;
use crate::agent::registry::{ToolContext, ToolError, ToolHandler, ToolName, ToolOutput};

/// Diagnostics the caller already has for this request (e.g. the run the user
/// is looking at).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ExecutionError>,
}

impl ExecutionContext {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Context,
    Database,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub error: String,
}

/// Same shape whatever the logs came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogReport {
    pub status: String,
    pub errors: Vec<NodeErrorReport>,
    pub full_logs: Value,
    pub source: LogSource,
}

pub const STATUS_NOT_FOUND: &str = "not_found";

impl ExecutionLogReport {
    fn not_found(source: LogSource) -> Self {
        Self {
            status: STATUS_NOT_FOUND.to_string(),
            errors: Vec::new(),
            full_logs: Value::Null,
            source,
        }
    }

    fn from_context(context: &ExecutionContext) -> Self {
        let status = context.status.clone().unwrap_or_else(|| {
            if context.errors.is_empty() {
                "success".to_string()
            } else {
                "error".to_string()
            }
        });
        Self {
            status,
            errors: context
                .errors
                .iter()
                .map(|e| NodeErrorReport {
                    node_id: e.node_id.clone(),
                    node_name: e.node_name.clone(),
                    error: e.message.clone(),
                })
                .collect(),
            full_logs: json!(context.logs),
            source: LogSource::Context,
        }
    }

    fn from_record(record: &ExecutionRecord, graph: Option<&WorkflowGraph>) -> Self {
        let errors = record
            .node_runs
            .iter()
            .filter_map(|run| {
                let error = run.error.as_ref()?;
                Some(NodeErrorReport {
                    node_id: Some(run.node_id.clone()),
                    node_name: graph
                        .and_then(|g| g.find_node(&run.node_id))
                        .map(|n| n.name.clone()),
                    error: error.clone(),
                })
            })
            .collect();
        Self {
            status: record.status.as_str().to_string(),
            errors,
            full_logs: serde_json::to_value(record).unwrap_or(Value::Null),
            source: LogSource::Database,
        }
    }
}

/// Fetches the most recent run's errors so the model can diagnose failures.
pub struct GetLatestExecutionLogsTool;

#[async_trait]
impl ToolHandler for GetLatestExecutionLogsTool {
    fn name(&self) -> ToolName {
        ToolName::GetLatestExecutionLogs
    }

    fn is_final(&self) -> bool {
        false
    }

    fn description(&self) -> &'static str {
        "Fetch the logs and node errors of the latest execution of the workflow. \
         Use this when the user reports that a run failed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workflowId": {
                    "type": "string",
                    "description": "Workflow to inspect; defaults to the current workflow"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let report = latest_execution_report(&args, ctx).await;
        info!(
            status = %report.status,
            source = ?report.source,
            errors = report.errors.len(),
            "Execution logs fetched"
        );
        let value = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        Ok(ToolOutput::Feedback(value))
    }
}

async fn latest_execution_report(args: &Value, ctx: &ToolContext<'_>) -> ExecutionLogReport {
    if let Some(context) = ctx.execution_context.filter(|c| !c.is_empty()) {
        return ExecutionLogReport::from_context(context);
    }

    let workflow_id = str_argument(args, "workflowId")
        .or_else(|| str_argument(args, "workflow_id"))
        .or(ctx.workflow_id);
    let Some(workflow_id) = workflow_id else {
        return ExecutionLogReport::not_found(LogSource::None);
    };

    match ctx.executions.find_latest_execution(workflow_id).await {
        Ok(Some(record)) => ExecutionLogReport::from_record(&record, ctx.current_workflow),
        Ok(None) => ExecutionLogReport::not_found(LogSource::Database),
        Err(e) => {
            warn!(
                workflow_id,
                error = %format!("{:#}", e),
                "Execution store unavailable"
            );
            ExecutionLogReport::not_found(LogSource::Database)
        }
    }
}
