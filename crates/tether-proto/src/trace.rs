//! Task-completion trace records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened at one point of the busy → ready decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEvent {
    /// Output arrived while the session was busy.
    BusySignal,
    /// A completion signal was seen; the debounce window started.
    DebounceSchedule,
    /// The debounce window elapsed.
    DebounceFire,
    /// The signal disappeared before the window elapsed.
    DebounceRejectSignal,
    /// The session left `busy` before the window elapsed.
    DebounceRejectStatus,
    /// The session moved busy → ready.
    TransitionReady,
}

impl TraceEvent {
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            TraceEvent::DebounceRejectSignal | TraceEvent::DebounceRejectStatus
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TraceEvent::BusySignal => "busy_signal",
            TraceEvent::DebounceSchedule => "debounce_schedule",
            TraceEvent::DebounceFire => "debounce_fire",
            TraceEvent::DebounceRejectSignal => "debounce_reject_signal",
            TraceEvent::DebounceRejectStatus => "debounce_reject_status",
            TraceEvent::TransitionReady => "transition_ready",
        }
    }
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletionTraceRecord {
    pub at: DateTime<Utc>,
    pub session_id: String,
    pub event: TraceEvent,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub task_complete: bool,
    /// Raw completion signal: ready or task-complete detected, and not loading.
    #[serde(default)]
    pub signal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl TaskCompletionTraceRecord {
    pub fn new(session_id: impl Into<String>, event: TraceEvent) -> Self {
        Self {
            at: Utc::now(),
            session_id: session_id.into(),
            event,
            loading: false,
            ready: false,
            task_complete: false,
            signal: false,
            excerpt: None,
        }
    }

    pub fn with_flags(mut self, loading: bool, ready: bool, task_complete: bool) -> Self {
        self.loading = loading;
        self.ready = ready;
        self.task_complete = task_complete;
        self
    }

    pub fn with_signal(mut self, signal: bool) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = Some(excerpt.into());
        self
    }
}
