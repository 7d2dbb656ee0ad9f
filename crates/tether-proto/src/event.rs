//! Events published by sessions.
//!
//! Events for one session are delivered in the order the terminal produced
//! them. Nothing is promised about ordering across sessions.

use crate::detection::{BlockingPromptDetection, LoginDetection};
use crate::message::SessionMessage;
use crate::session::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// One normalized line of output.
    Output { line: String },
    Ready,
    LoginRequired { detection: LoginDetection },
    BlockingPrompt { detection: BlockingPromptDetection },
    AutoResponded {
        description: String,
        response: String,
    },
    Message { message: SessionMessage },
    Question { message: SessionMessage },
    TaskComplete { confidence: u8 },
    Stalled { silent_ms: u64 },
    Exited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        /// True when the exit followed a stop or kill request.
        requested: bool,
    },
    Error { message: String },
}

impl SessionEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEventKind::StatusChanged { .. } => "status_changed",
            SessionEventKind::Output { .. } => "output",
            SessionEventKind::Ready => "ready",
            SessionEventKind::LoginRequired { .. } => "login_required",
            SessionEventKind::BlockingPrompt { .. } => "blocking_prompt",
            SessionEventKind::AutoResponded { .. } => "auto_responded",
            SessionEventKind::Message { .. } => "message",
            SessionEventKind::Question { .. } => "question",
            SessionEventKind::TaskComplete { .. } => "task_complete",
            SessionEventKind::Stalled { .. } => "stalled",
            SessionEventKind::Exited { .. } => "exited",
            SessionEventKind::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let event = SessionEvent::new(
            "s1",
            SessionEventKind::StatusChanged {
                from: SessionStatus::Ready,
                to: SessionStatus::Busy,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["from"], "ready");
        assert_eq!(json["to"], "busy");
    }
}
