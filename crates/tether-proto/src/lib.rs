//! # tether-proto
//!
//! Shared types for the Tether agent orchestration framework.
//!
//! This crate holds the data shapes that cross the boundary between the
//! orchestration core and whatever front-end drives it (a CLI, a management
//! API, a tool-invocation protocol):
//! - Spawn configuration and session handles
//! - Session messages and parsed output units
//! - Blocking-prompt detections and auto-response rules
//! - Task-completion trace records
//! - Stable error codes and the discriminated [`Outcome`] result

mod detection;
mod error;
mod event;
mod message;
mod preset;
mod session;
mod trace;

pub use detection::{
    AutoResponseRule, BlockingPromptCategory, BlockingPromptDetection, ExitDetection,
    LoginDetection, LoginMethod, ResponseType,
};
pub use error::{ErrorCode, FailureTag, HasErrorCode, Outcome, OutcomeError, SuccessTag};
pub use event::{SessionEvent, SessionEventKind};
pub use message::{MessageDirection, MessageKind, OutputKind, ParsedOutput, SessionMessage};
pub use preset::{ApprovalPreset, PresetConfig, PresetInfo};
pub use session::{SessionHandle, SessionMetrics, SessionStatus, SpawnConfig};
pub use trace::{TaskCompletionTraceRecord, TraceEvent};
