use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::plan::Plan;

/// Kind-specific payload of an agent event.
///
/// Serialized with an internal `type` tag so the wire form matches what
/// UI clients consume, e.g. `{"type": "tool_call", "tool_name": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Message {
        message: String,
    },
    ToolCall {
        tool_name: String,
        function_name: String,
        function_args: Value,
    },
    ToolResult {
        tool_name: String,
        function_name: String,
        function_args: Value,
        function_result: Value,
    },
    PlanCreated {
        plan: Plan,
    },
    PlanUpdated {
        plan: Plan,
    },
    Pause,
    Report {
        message: String,
    },
    Notification {
        message: String,
    },
    Error {
        error: String,
    },
    Done,
}

impl EventPayload {
    /// Stable kind name, used for SSE event names and logging
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Message { .. } => "message",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::PlanCreated { .. } => "plan_created",
            EventPayload::PlanUpdated { .. } => "plan_updated",
            EventPayload::Pause => "pause",
            EventPayload::Report { .. } => "report",
            EventPayload::Notification { .. } => "notification",
            EventPayload::Error { .. } => "error",
            EventPayload::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, EventPayload::Done)
    }
}

/// One immutable record of agent progress.
///
/// `sequence` is assigned by the agent's event buffer at append time:
/// per-agent monotonic, starting at 1, gapless. An event is never mutated
/// after a sequence has been assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub sequence: u64,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn is_done(&self) -> bool {
        self.payload.is_done()
    }
}
