use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use flowsmith_core::WorkflowGraph;
use flowsmith_core::catalog::NodeTypeCatalog;
use flowsmith_core::executions::ExecutionStore;
use flowsmith_core::ports::ServicePortContract;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use super::AgentResult;
use super::tools::{
    AdviseUserTool, BuildWorkflowTool, ExecutionContext, GetLatestExecutionLogsTool,
    ValidateWorkflowTool,
};

/// The closed set of tools the model can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    BuildWorkflow,
    AdviseUser,
    ValidateWorkflow,
    GetLatestExecutionLogs,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::BuildWorkflow,
        ToolName::AdviseUser,
        ToolName::ValidateWorkflow,
        ToolName::GetLatestExecutionLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::BuildWorkflow => "build_workflow",
            ToolName::AdviseUser => "advise_user",
            ToolName::ValidateWorkflow => "validate_workflow",
            ToolName::GetLatestExecutionLogs => "get_latest_execution_logs",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tool '{0}'")]
pub struct UnknownToolName(pub String);

impl FromStr for ToolName {
    type Err = UnknownToolName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownToolName(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a tool produced: the final answer, or feedback for the next turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Final(AgentResult),
    Feedback(Value),
}

/// Everything a handler may read while executing. Borrowed for one tool call.
pub struct ToolContext<'a> {
    pub request: &'a str,
    pub current_workflow: Option<&'a WorkflowGraph>,
    pub workflow_id: Option<&'a str>,
    pub execution_context: Option<&'a ExecutionContext>,
    pub catalog: &'a dyn NodeTypeCatalog,
    pub executions: &'a dyn ExecutionStore,
    pub contract: &'a ServicePortContract,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> ToolName;

    /// Whether invoking this tool ends the agent loop.
    fn is_final(&self) -> bool;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError>;
}

/// Tool name → handler. Built once at startup and shared read-only.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: BTreeMap<ToolName, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(BuildWorkflowTool);
        registry.register(AdviseUserTool);
        registry.register(ValidateWorkflowTool);
        registry.register(GetLatestExecutionLogsTool);
        registry
    }

    /// Register a handler. A later registration for the same name replaces the earlier one.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) {
        let name = handler.name();
        if self.handlers.insert(name, Box::new(handler)).is_some() {
            warn!(tool = %name, "Overwriting previously registered tool handler");
        }
    }

    pub fn handler(&self, tool: ToolName) -> Option<&dyn ToolHandler> {
        self.handlers.get(&tool).map(|h| h.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        name.parse().ok().and_then(|tool| self.handler(tool))
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// False for unknown names.
    pub fn is_final_tool(&self, name: &str) -> bool {
        self.get(name).is_some_and(|h| h.is_final())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// OpenAI function-tool descriptors, in stable order.
    pub fn descriptors(&self) -> Vec<Value> {
        self.handlers
            .values()
            .map(|h| {
                json!({
                    "type": "function",
                    "function": {
                        "name": h.name().as_str(),
                        "description": h.description(),
                        "parameters": h.parameters(),
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LoudAdvice;

    #[async_trait]
    impl ToolHandler for LoudAdvice {
        fn name(&self) -> ToolName {
            ToolName::AdviseUser
        }

        fn is_final(&self) -> bool {
            false
        }

        fn description(&self) -> &'static str {
            "replacement"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolContext<'_>,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::Feedback(json!("LOUD")))
        }
    }

    #[test]
    fn tool_names_parse_from_wire_names() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>(), Ok(tool));
        }
        assert_eq!(
            "delete_everything".parse::<ToolName>(),
            Err(UnknownToolName("delete_everything".to_string()))
        );
    }

    #[test]
    fn standard_registry_flags_terminal_tools() {
        let registry = ToolRegistry::standard();
        assert_eq!(registry.len(), 4);
        assert!(registry.is_final_tool("build_workflow"));
        assert!(registry.is_final_tool("advise_user"));
        assert!(!registry.is_final_tool("validate_workflow"));
        assert!(!registry.is_final_tool("get_latest_execution_logs"));
        assert!(!registry.is_final_tool("nope"));
        assert!(!registry.has("nope"));
        assert!(registry.has("validate_workflow"));
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ToolRegistry::standard();
        registry.register(LoudAdvice);
        assert_eq!(registry.len(), 4);
        assert!(!registry.is_final_tool("advise_user"));
        assert_eq!(registry.get("advise_user").unwrap().description(), "replacement");
    }

    #[test]
    fn descriptors_follow_tool_order() {
        let names: Vec<String> = ToolRegistry::standard()
            .descriptors()
            .iter()
            .map(|d| d["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "build_workflow",
                "advise_user",
                "validate_workflow",
                "get_latest_execution_logs"
            ]
        );
    }
}
