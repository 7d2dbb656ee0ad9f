//! Messages exchanged with a session and parsed output units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Direction of a message relative to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Sent to the agent.
    Inbound,
    /// Produced by the agent.
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Task,
    Response,
    Question,
}

/// A message recorded against a session.
///
/// Ids are `<session-id>-<seq>` where `seq` is a per-session counter, so
/// ids are unique and sort in the order they were recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub direction: MessageDirection,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(
        session_id: &str,
        seq: u64,
        direction: MessageDirection,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{session_id}-{seq}"),
            session_id: session_id.to_string(),
            direction,
            kind,
            content: content.into(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Classification of a parsed output unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Response,
    Question,
    Error,
}

/// A complete unit of agent output, as judged by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedOutput {
    pub kind: OutputKind,
    pub content: String,
    pub is_complete: bool,
    pub is_question: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ParsedOutput {
    pub fn response(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Response,
            content: content.into(),
            is_complete: true,
            is_question: false,
            metadata: Map::new(),
        }
    }

    pub fn question(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Question,
            is_question: true,
            ..Self::response(content)
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            ..Self::response(content)
        }
    }

    /// Maps the output kind onto the message kind recorded for it.
    pub fn message_kind(&self) -> MessageKind {
        if self.is_question {
            MessageKind::Question
        } else {
            MessageKind::Response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_includes_sequence() {
        let msg = SessionMessage::new(
            "abc",
            7,
            MessageDirection::Inbound,
            MessageKind::Task,
            "hello",
        );
        assert_eq!(msg.id, "abc-7");
        assert_eq!(msg.session_id, "abc");
    }

    #[test]
    fn test_question_output_maps_to_question_message() {
        let parsed = ParsedOutput::question("Which file?");
        assert!(parsed.is_question);
        assert_eq!(parsed.message_kind(), MessageKind::Question);
        assert_eq!(
            ParsedOutput::response("done").message_kind(),
            MessageKind::Response
        );
    }
}
