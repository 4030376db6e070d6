//! Context lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a context event. Free-form kinds round-trip through `Other`; the
/// wildcard `all` used for subscriptions is a bus concern, not an event kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    ContextCreated,
    ContextUpdated,
    ContextDeleted,
    AgentStatusChanged,
    ConversationCompleted,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::ContextCreated => "context_created",
            EventKind::ContextUpdated => "context_updated",
            EventKind::ContextDeleted => "context_deleted",
            EventKind::AgentStatusChanged => "agent_status_changed",
            EventKind::ConversationCompleted => "conversation_completed",
            EventKind::Other(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "context_created" => EventKind::ContextCreated,
            "context_updated" => EventKind::ContextUpdated,
            "context_deleted" => EventKind::ContextDeleted,
            "agent_status_changed" => EventKind::AgentStatusChanged,
            "conversation_completed" => EventKind::ConversationCompleted,
            _ => EventKind::Other(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event emitted by the context manager (or adapters) into the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    /// Emitting component, e.g. `context_manager`.
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: EventKind,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ContextEvent {
    pub fn new(
        source: impl Into<String>,
        event_type: EventKind,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            event_type,
            agent_id: agent_id.into(),
            session_id: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
