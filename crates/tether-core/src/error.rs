//! Error types for sessions and the manager.

use std::io;
use tether_proto::{ErrorCode, HasErrorCode, SessionStatus};

use crate::config::ConfigError;
use crate::workspace::WorkspaceError;

/// Errors raised by a single session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// PTY allocation or process spawn failed.
    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    /// Writing to or resizing the terminal failed.
    #[error("Terminal I/O error: {0}")]
    Io(#[from] io::Error),

    /// The operation is not valid in the session's current status.
    #[error("Session is {status}; cannot {operation}")]
    InvalidState {
        status: SessionStatus,
        operation: &'static str,
    },

    /// No process is attached (never started or already reaped).
    #[error("Session has no running process")]
    NotRunning,
}

/// Errors returned by [`crate::Manager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Unknown adapter type: {0}")]
    UnknownAdapter(String),

    #[error("Invalid spawn config: {0}")]
    InvalidConfig(String),

    #[error("Capacity exceeded: {active} active sessions (max {max})")]
    CapacityExceeded { active: usize, max: usize },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Spawn failed for session {id}: {message}")]
    Spawn { id: String, message: String },

    #[error("Process error in session {id}: {message}")]
    Process { id: String, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Authentication required for session {id}: {instructions}")]
    AuthenticationRequired { id: String, instructions: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ManagerError::UnknownAdapter(_)
            | ManagerError::InvalidConfig(_)
            | ManagerError::Config(_) => ErrorCode::ConfigError,
            ManagerError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            ManagerError::SessionNotFound(_) => ErrorCode::NotFound,
            ManagerError::Spawn { .. } | ManagerError::Process { .. } => ErrorCode::ProcessError,
            ManagerError::Timeout { .. } => ErrorCode::Timeout,
            ManagerError::AuthenticationRequired { .. } => ErrorCode::AuthRequired,
            ManagerError::InvalidState(_) => ErrorCode::InvalidState,
            ManagerError::Workspace(_) => ErrorCode::WorkspaceError,
        }
    }

    pub(crate) fn from_session(id: &str, err: SessionError) -> Self {
        match err {
            SessionError::Spawn { message, .. } => ManagerError::Spawn {
                id: id.to_string(),
                message,
            },
            SessionError::InvalidState { .. } | SessionError::NotRunning => {
                ManagerError::InvalidState(format!("{id}: {err}"))
            }
            SessionError::Io(e) => ManagerError::Process {
                id: id.to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl HasErrorCode for ManagerError {
    fn code(&self) -> ErrorCode {
        ManagerError::code(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::Outcome;

    #[test]
    fn test_not_found_message_and_code() {
        let err = ManagerError::SessionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Session not found: abc");
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_outcome_from_result() {
        let result: Result<(), ManagerError> = Err(ManagerError::CapacityExceeded { active: 2, max: 2 });
        let outcome: Outcome<()> = result.into();
        let error = outcome.error().unwrap();
        assert_eq!(error.code, ErrorCode::CapacityExceeded);
        assert!(error.message.contains("max 2"));
    }

    #[test]
    fn test_session_errors_map_to_codes() {
        let spawn = ManagerError::from_session(
            "s",
            SessionError::Spawn {
                command: "nope".into(),
                message: "No such file".into(),
            },
        );
        assert_eq!(spawn.code(), ErrorCode::ProcessError);

        let state = ManagerError::from_session(
            "s",
            SessionError::InvalidState {
                status: SessionStatus::Stopped,
                operation: "send",
            },
        );
        assert_eq!(state.code(), ErrorCode::InvalidState);
        assert!(state.to_string().contains("stopped"));
    }
}
