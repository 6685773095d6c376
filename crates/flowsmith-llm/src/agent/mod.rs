//! The tool-calling agent loop.
//!
//! Each turn the model sees the system prompt, the conversation tail, the
//! user request and every tool message produced so far, and calls exactly one
//! tool. Terminal tools (`build_workflow`, `advise_user`) end the loop with
//! their result; the others (`validate_workflow`, `get_latest_execution_logs`)
//! feed their result back as a tool message for the next turn.

mod events;
mod prompt;
mod registry;
pub mod conversation;
pub mod tools;


pub use events::{AgentEvent, EventSink};
pub use registry::{
    ToolContext, ToolError, ToolHandler, ToolName, ToolOutput, ToolRegistry, UnknownToolName,
};

use conversation::{ConversationWindow, DEFAULT_WINDOW_SIZE};
use flowsmith_core::catalog::NodeTypeCatalog;
use flowsmith_core::executions::ExecutionStore;
use flowsmith_core::ports::ServicePortContract;
use flowsmith_core::{GraphChange, ValidationReport, WorkflowGraph};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tools::ExecutionContext;
use tracing::{debug, info, warn};

use crate::{ChatBackend, Message};

pub const DEFAULT_MAX_TURNS: usize = 8;

const TURN_LIMIT_NOTICE: &str = "I couldn't finish the workflow within the allowed number of steps. \
     Please refine the request or try again.";
const EMPTY_ANSWER_NOTICE: &str = "I don't have anything to add.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Hard cap on model invocations per request.
    pub max_turns: usize,
    /// Conversation entries replayed into the context.
    pub history_window: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            history_window: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// One user request to the agent.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub message: String,
    pub existing_graph: Option<WorkflowGraph>,
    pub history: ConversationWindow,
    pub workflow_id: Option<String>,
    pub execution_context: Option<ExecutionContext>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_existing_graph(mut self, graph: WorkflowGraph) -> Self {
        self.existing_graph = Some(graph);
        self
    }

    pub fn with_history(mut self, history: ConversationWindow) -> Self {
        self.history = history;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_execution_context(mut self, context: ExecutionContext) -> Self {
        self.execution_context = Some(context);
        self
    }
}

/// The user-visible outcome of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub graph: GraphChange,
    pub message: String,
    #[serde(default)]
    pub missing_node_types: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub turn_limit_reached: bool,
}

impl AgentResult {
    /// A plain answer with no workflow change.
    pub fn answer(message: impl Into<String>) -> Self {
        Self {
            graph: GraphChange::NoChange,
            message: message.into(),
            missing_node_types: Vec::new(),
            warnings: Vec::new(),
            turn_limit_reached: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model requested unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Model call failed: {0}")]
    Model(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed { tool: ToolName, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

/// Drives the model through the registered tools until a terminal tool runs.
pub struct Agent<'a, C: ChatBackend> {
    backend: &'a C,
    registry: &'a ToolRegistry,
    catalog: &'a dyn NodeTypeCatalog,
    executions: &'a dyn ExecutionStore,
    contract: &'a ServicePortContract,
    config: AgentConfig,
    events: EventSink,
    cancel: Option<CancellationToken>,
}

impl<'a, C: ChatBackend> Agent<'a, C> {
    pub fn new(
        backend: &'a C,
        registry: &'a ToolRegistry,
        catalog: &'a dyn NodeTypeCatalog,
        executions: &'a dyn ExecutionStore,
        contract: &'a ServicePortContract,
    ) -> Self {
        Self {
            backend,
            registry,
            catalog,
            executions,
            contract,
            config: AgentConfig::default(),
            events: EventSink::disconnected(),
            cancel: None,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn fail(&self, error: AgentError) -> AgentError {
        warn!(error = %error, "Agent loop aborted");
        self.events.emit(AgentEvent::Error {
            message: error.to_string(),
        });
        error
    }

    fn finish(&self, result: AgentResult) -> AgentResult {
        info!(
            changed = !result.graph.is_no_change(),
            missing = result.missing_node_types.len(),
            turn_limit_reached = result.turn_limit_reached,
            "Agent finished"
        );
        self.events.emit(AgentEvent::FinalResult(result.clone()));
        result
    }

    async fn initial_messages(&self, request: &AgentRequest) -> Vec<Message> {
        let node_types = match self.catalog.list_node_types().await {
            Ok(types) => Some(types),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Node type registry unavailable; prompting without it");
                None
            }
        };

        let mut messages = vec![Message::system(prompt::agent_system_prompt(
            node_types.as_deref(),
            self.contract,
        ))];
        messages.extend(
            request
                .history
                .recent(self.config.history_window)
                .iter()
                .map(|entry| entry.to_message()),
        );
        messages.push(Message::user(prompt::user_request_message(
            &request.message,
            request.existing_graph.as_ref(),
        )));
        messages
    }

    /// Run the loop for one request.
    pub async fn run(&self, request: &AgentRequest) -> Result<AgentResult, AgentError> {
        let mut messages = self.initial_messages(request).await;
        let tools = self.registry.descriptors();
        let mut last_text: Option<String> = None;

        for turn in 1..=self.config.max_turns {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(self.fail(AgentError::Cancelled));
            }
            self.events.emit(AgentEvent::TurnStarted { turn });
            debug!(turn, messages = messages.len(), "Agent turn");

            let response = self
                .backend
                .chat(messages.clone(), Some(tools.clone()))
                .await
                .map_err(|e| self.fail(AgentError::Model(format!("{:#}", e))))?;

            let Some(choice) = response.choices.into_iter().next() else {
                return Err(self.fail(AgentError::Model("No response from model".to_string())));
            };
            let message = choice.message;
            let text = message.content_text().map(String::from);

            let call = match message.tool_calls.as_deref() {
                Some([first, rest @ ..]) => {
                    if !rest.is_empty() {
                        warn!(
                            ignored = rest.len(),
                            "Model issued several tool calls in one turn; only the first is run"
                        );
                    }
                    first.clone()
                }
                _ => {
                    info!(turn, "Model answered without a tool call");
                    let answer = text.unwrap_or_else(|| EMPTY_ANSWER_NOTICE.to_string());
                    return Ok(self.finish(AgentResult::answer(answer)));
                }
            };
            if text.is_some() {
                last_text = text.clone();
            }

            let tool = match call.function.name.parse::<ToolName>() {
                Ok(tool) => tool,
                Err(_) => return Err(self.fail(AgentError::UnknownTool(call.function.name))),
            };
            let Some(handler) = self.registry.handler(tool) else {
                return Err(self.fail(AgentError::UnknownTool(call.function.name)));
            };

            let terminal = handler.is_final();
            info!(turn, tool = %tool, terminal, "Tool selected");
            self.events.emit(AgentEvent::ToolSelected {
                tool: tool.to_string(),
                terminal,
            });

            let ctx = ToolContext {
                request: &request.message,
                current_workflow: request.existing_graph.as_ref(),
                workflow_id: request.workflow_id.as_deref(),
                execution_context: request.execution_context.as_ref(),
                catalog: self.catalog,
                executions: self.executions,
                contract: self.contract,
            };

            let outcome = match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(args) => handler.execute(args, &ctx).await,
                Err(e) => Err(ToolError::InvalidArguments(format!(
                    "arguments are not valid JSON: {}",
                    e
                ))),
            };

            let feedback = match outcome {
                Ok(ToolOutput::Final(result)) => return Ok(self.finish(result)),
                Ok(ToolOutput::Feedback(value)) if terminal => {
                    let message = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    return Ok(self.finish(AgentResult::answer(message)));
                }
                Ok(ToolOutput::Feedback(value)) => {
                    if tool == ToolName::ValidateWorkflow {
                        self.emit_validation(&value);
                    }
                    value
                }
                Err(e) if terminal => {
                    return Err(self.fail(AgentError::ToolFailed {
                        tool,
                        message: e.to_string(),
                    }));
                }
                Err(e) => {
                    warn!(tool = %tool, error = %e, "Tool failed; reporting to model");
                    self.events.emit(AgentEvent::ToolFailed {
                        tool: tool.to_string(),
                        error: e.to_string(),
                    });
                    json!({"error": e.to_string()})
                }
            };

            let call_id = call.id.clone();
            let mut assistant = Message::assistant_tool_calls(vec![call]);
            assistant.content = text;
            messages.push(assistant);
            messages.push(Message::tool_result(call_id, feedback.to_string()));
        }

        warn!(
            max_turns = self.config.max_turns,
            "Turn limit reached; returning partial answer"
        );
        let mut result = AgentResult::answer(last_text.unwrap_or_else(|| TURN_LIMIT_NOTICE.to_string()));
        result.turn_limit_reached = true;
        Ok(self.finish(result))
    }

    fn emit_validation(&self, value: &Value) {
        if let Ok(report) = serde_json::from_value::<ValidationReport>(value.clone()) {
            self.events.emit(AgentEvent::ValidationResult {
                valid: report.valid,
                errors: report.errors,
                warnings: report.warnings,
            });
        }
    }
}
