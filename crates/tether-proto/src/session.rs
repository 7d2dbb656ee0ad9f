//! Session configuration, lifecycle status, and handles.

use crate::detection::AutoResponseRule;
use crate::preset::ApprovalPreset;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for spawning one agent session.
///
/// Immutable once the session has started; restarts reuse the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnConfig {
    /// Human-readable session name.
    pub name: String,
    /// Agent type tag, resolved against the adapter registry (e.g. `claude`).
    #[serde(rename = "type")]
    pub agent_type: String,
    /// Capabilities this agent advertises (used by `list` filters).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Optional role label (e.g. `reviewer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Working directory for the spawned process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Environment overrides, applied after the adapter's own environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Whether `spawn` should wait for the session to become ready.
    #[serde(default)]
    pub wait_for_ready: bool,
    /// Maximum time to wait for readiness, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,
    /// Restart the session after a stall or an unrequested crash.
    #[serde(default)]
    pub auto_restart: bool,
    /// Emit a stall event after this much silence (milliseconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stall_timeout_ms: Option<u64>,
    /// Additional auto-response rules, evaluated before the adapter defaults.
    #[serde(default)]
    pub rule_overrides: Vec<AutoResponseRule>,
    /// Approval preset translated into tool-specific flags by the adapter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_preset: Option<ApprovalPreset>,
    /// Model override passed to tools that accept one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Credential handed to the tool through its expected environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Extra arguments appended verbatim after the adapter's arguments.
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Terminal width override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    /// Terminal height override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

impl SpawnConfig {
    /// Creates a config with only the required fields set.
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            role: None,
            workdir: None,
            env: BTreeMap::new(),
            wait_for_ready: false,
            ready_timeout_ms: None,
            auto_restart: false,
            stall_timeout_ms: None,
            rule_overrides: Vec::new(),
            approval_preset: None,
            model: None,
            api_key: None,
            extra_args: Vec::new(),
            cols: None,
            rows: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn wait_for_ready(mut self, timeout_ms: u64) -> Self {
        self.wait_for_ready = true;
        self.ready_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_preset(mut self, preset: ApprovalPreset) -> Self {
        self.approval_preset = Some(preset);
        self
    }
}

/// Lifecycle status of a session.
///
/// Transitions are monotonic except the `Ready` ⇄ `Busy` cycle;
/// `Stopped` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Starting,
    Authenticating,
    Ready,
    Busy,
    Stopping,
    Stopped,
    Error,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Starting => 1,
            SessionStatus::Authenticating => 2,
            SessionStatus::Ready | SessionStatus::Busy => 3,
            SessionStatus::Stopping => 4,
            SessionStatus::Stopped | SessionStatus::Error => 5,
        }
    }

    /// Returns true for `Stopped` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Error)
    }

    /// Returns true while the session counts against the manager's ceiling.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the session can accept input.
    pub fn accepts_input(self) -> bool {
        matches!(
            self,
            SessionStatus::Starting
                | SessionStatus::Authenticating
                | SessionStatus::Ready
                | SessionStatus::Busy
        )
    }

    /// Checks whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        match (self, next) {
            (SessionStatus::Ready, SessionStatus::Busy)
            | (SessionStatus::Busy, SessionStatus::Ready) => true,
            // Error is only reachable while a process is being created or torn down.
            (_, SessionStatus::Error) => matches!(
                self,
                SessionStatus::Pending | SessionStatus::Starting | SessionStatus::Stopping
            ),
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Starting => "starting",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Ready => "ready",
            SessionStatus::Busy => "busy",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub restarts: u32,
}

/// Per-session counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub session_id: String,
    pub status: SessionStatus,
    pub uptime_ms: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
    pub restarts: u32,
    pub turns_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_busy_cycle_is_allowed() {
        assert!(SessionStatus::Ready.can_transition_to(SessionStatus::Busy));
        assert!(SessionStatus::Busy.can_transition_to(SessionStatus::Ready));
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(SessionStatus::Pending.can_transition_to(SessionStatus::Starting));
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Authenticating));
        assert!(SessionStatus::Authenticating.can_transition_to(SessionStatus::Ready));
        assert!(SessionStatus::Busy.can_transition_to(SessionStatus::Stopping));
        assert!(!SessionStatus::Ready.can_transition_to(SessionStatus::Starting));
        assert!(!SessionStatus::Ready.can_transition_to(SessionStatus::Authenticating));
        assert!(!SessionStatus::Stopping.can_transition_to(SessionStatus::Busy));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [
            SessionStatus::Starting,
            SessionStatus::Ready,
            SessionStatus::Stopped,
            SessionStatus::Error,
        ] {
            assert!(!SessionStatus::Stopped.can_transition_to(next));
            assert!(!SessionStatus::Error.can_transition_to(next));
        }
    }

    #[test]
    fn test_error_reachable_only_from_starting_or_stopping() {
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Error));
        assert!(SessionStatus::Stopping.can_transition_to(SessionStatus::Error));
        assert!(!SessionStatus::Ready.can_transition_to(SessionStatus::Error));
        assert!(!SessionStatus::Busy.can_transition_to(SessionStatus::Error));
    }

    #[test]
    fn test_spawn_config_serde_uses_type_key() {
        let config = SpawnConfig::new("worker", "claude").with_role("reviewer");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "claude");
        assert_eq!(json["role"], "reviewer");

        let parsed: SpawnConfig =
            serde_json::from_str(r#"{"name":"a","type":"shell","waitForReady":true}"#).unwrap();
        assert_eq!(parsed.agent_type, "shell");
        assert!(parsed.wait_for_ready);
        assert!(parsed.env.is_empty());
    }
}
