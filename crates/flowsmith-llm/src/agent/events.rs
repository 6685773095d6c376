use serde::Serialize;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::AgentResult;

/// Progress events pushed while the agent loop runs. Serialized as `{type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    TurnStarted {
        turn: usize,
    },
    ToolSelected {
        tool: String,
        terminal: bool,
    },
    ValidationResult {
        valid: bool,
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    ToolFailed {
        tool: String,
        error: String,
    },
    FinalResult(AgentResult),
    Error {
        message: String,
    },
}

/// Fire-and-forget event channel. Never blocks and never fails the loop.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AgentEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                debug!(?event, "Progress observer is slow; dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_as_type_and_data() {
        let event = AgentEvent::ToolSelected {
            tool: "validate_workflow".to_string(),
            terminal: false,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "tool_selected", "data": {"tool": "validate_workflow", "terminal": false}})
        );
    }

    #[test]
    fn full_or_closed_channel_is_ignored() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let sink = EventSink::new(tx);
        sink.emit(AgentEvent::TurnStarted { turn: 1 });
        sink.emit(AgentEvent::TurnStarted { turn: 2 });
        drop(rx);
        sink.emit(AgentEvent::TurnStarted { turn: 3 });
        EventSink::disconnected().emit(AgentEvent::TurnStarted { turn: 4 });
    }
}
