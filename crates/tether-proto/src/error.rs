//! Stable error codes and the discriminated result returned at the boundary.

use serde::{Deserialize, Serialize};

/// Stable, machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigError,
    CapacityExceeded,
    NotFound,
    ProcessError,
    Timeout,
    AuthRequired,
    InvalidState,
    WorkspaceError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ProcessError => "PROCESS_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::WorkspaceError => "WORKSPACE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload of a failed [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct OutcomeError {
    pub code: ErrorCode,
    pub message: String,
}

/// Discriminated result handed to front-ends.
///
/// Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Success { success: SuccessTag, data: T },
    Failure { success: FailureTag, error: OutcomeError },
}

/// Serializes as `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuccessTag;

/// Serializes as `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailureTag;

impl Serialize for SuccessTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for SuccessTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(SuccessTag)
        } else {
            Err(serde::de::Error::custom("expected success: true"))
        }
    }
}

impl Serialize for FailureTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(false)
    }
}

impl<'de> Deserialize<'de> for FailureTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Err(serde::de::Error::custom("expected success: false"))
        } else {
            Ok(FailureTag)
        }
    }
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Outcome::Success {
            success: SuccessTag,
            data,
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Outcome::Failure {
            success: FailureTag,
            error: OutcomeError {
                code,
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Success { data, .. } => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&OutcomeError> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, OutcomeError> {
        match self {
            Outcome::Success { data, .. } => Ok(data),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
}

/// Implemented by error types that carry a stable [`ErrorCode`].
pub trait HasErrorCode: std::fmt::Display {
    fn code(&self) -> ErrorCode;
}

impl<T, E: HasErrorCode> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Outcome::ok(data),
            Err(e) => Outcome::err(e.code(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let outcome = Outcome::ok(vec![1, 2]);
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": true, "data": [1, 2]})
        );
    }

    #[test]
    fn test_failure_shape() {
        let outcome: Outcome<()> = Outcome::err(ErrorCode::NotFound, "Session not found: abc");
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({"success": false, "error": {"code": "NOT_FOUND", "message": "Session not found: abc"}})
        );
    }

    #[test]
    fn test_round_trip_discriminates_on_success_flag() {
        let parsed: Outcome<u32> = serde_json::from_value(
            json!({"success": false, "error": {"code": "TIMEOUT", "message": "late"}}),
        )
        .unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.error().unwrap().code, ErrorCode::Timeout);
    }
}
