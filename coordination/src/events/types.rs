//! Event types streamed to the consumer of a workflow run.
//!
//! Every event carries the stage that produced it, a status, a JSON object
//! payload, optional latency and a timestamp. Delivery is at-most-once with
//! no replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ErrorKind;

/// Stage name of the successful terminal event.
pub const STAGE_DONE: &str = "done";
/// Stage name of the failed terminal event.
pub const STAGE_ERROR: &str = "error";
/// Stage name of each streamed debate turn.
pub const STAGE_DEBATE_TURN: &str = "debate:turn";

/// Stage name for the events of one agent task.
pub fn agent_stage(agent_name: &str) -> String {
    format!("agent:{}", agent_name)
}

/// Status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Running,
    Streaming,
    Complete,
    Error,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Streaming => write!(f, "streaming"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub stage: String,
    pub status: EventStatus,
    /// Always a JSON object.
    pub payload: Value,
    pub latency_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    /// Build an event, wrapping non-object payloads as `{"value": ...}`.
    pub fn new(
        stage: impl Into<String>,
        status: EventStatus,
        payload: Value,
        latency_ms: Option<u64>,
    ) -> Self {
        let payload = match payload {
            Value::Object(_) => payload,
            Value::Null => json!({}),
            other => json!({ "value": other }),
        };
        Self {
            stage: stage.into(),
            status,
            payload,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// The terminal `error` event with a machine-readable kind.
    pub fn terminal_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(
            STAGE_ERROR,
            EventStatus::Error,
            json!({ "kind": kind, "message": message.into() }),
            None,
        )
    }

    /// Whether this is the `done` or `error` sentinel ending a run.
    pub fn is_terminal(&self) -> bool {
        self.stage == STAGE_DONE || self.stage == STAGE_ERROR
    }

    /// `kind` from an error payload, if present.
    pub fn error_kind(&self) -> Option<&str> {
        self.payload.get("kind").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::new(
            "classify",
            EventStatus::Complete,
            json!({"route": "fast"}),
            Some(3),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"stage\":\"classify\""));
        assert!(json.contains("\"status\":\"complete\""));
        assert!(json.contains("\"latency_ms\":3"));

        let back: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_payload_is_always_object() {
        let null = WorkflowEvent::new("x", EventStatus::Running, Value::Null, None);
        assert!(null.payload.is_object());
        let scalar = WorkflowEvent::new("x", EventStatus::Running, json!(5), None);
        assert_eq!(scalar.payload["value"], 5);
    }

    #[test]
    fn test_terminal_detection() {
        assert!(WorkflowEvent::new(STAGE_DONE, EventStatus::Complete, json!({}), None).is_terminal());
        let err = WorkflowEvent::terminal_error(ErrorKind::Classification, "empty query");
        assert!(err.is_terminal());
        assert_eq!(err.error_kind(), Some("classification"));
        assert!(!WorkflowEvent::new(agent_stage("labor"), EventStatus::Error, json!({}), None)
            .is_terminal());
        assert_eq!(agent_stage("labor"), "agent:labor");
    }
}
