use async_trait::async_trait;
use flowsmith_core::GraphChange;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::AgentResult;
use crate::agent::registry::{ToolContext, ToolError, ToolHandler, ToolName, ToolOutput};

/// Answers the user without touching the workflow.
pub struct AdviseUserTool;

#[derive(Debug, Deserialize)]
struct AdviseArgs {
    message: String,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
}

fn format_advice(message: &str, suggestions: &[String]) -> String {
    let bullets: Vec<String> = suggestions
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| format!("- {}", s))
        .collect();
    if bullets.is_empty() {
        return message.to_string();
    }
    format!("{}\n\n{}", message, bullets.join("\n"))
}

#[async_trait]
impl ToolHandler for AdviseUserTool {
    fn name(&self) -> ToolName {
        ToolName::AdviseUser
    }

    fn is_final(&self) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "Reply to the user without changing the workflow: answer questions, explain, \
         or ask for missing details. Ends the conversation turn."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Reply shown to the user"},
                "suggestions": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional follow-up suggestions"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext<'_>) -> Result<ToolOutput, ToolError> {
        let args: AdviseArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(format!("advise_user: {}", e)))?;

        Ok(ToolOutput::Final(AgentResult {
            graph: GraphChange::NoChange,
            message: format_advice(&args.message, args.suggestions.as_deref().unwrap_or(&[])),
            missing_node_types: Vec::new(),
            warnings: Vec::new(),
            turn_limit_reached: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestions_become_bullets() {
        let text = format_advice(
            "You need a trigger.",
            &["Add a webhook".to_string(), " ".to_string(), "Or a schedule".to_string()],
        );
        assert_eq!(text, "You need a trigger.\n\n- Add a webhook\n- Or a schedule");
    }

    #[test]
    fn message_alone_is_verbatim() {
        assert_eq!(format_advice("Hi there", &[]), "Hi there");
    }
}
