//! Configuration loaded from `tether.yml`.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_proto::SpawnConfig;

use crate::completion::ConfidenceWeights;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tether.yml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub manager: ManagerConfig,
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ceiling on non-terminal sessions.
    pub max_sessions: usize,
    pub ready_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Default stall timeout for sessions that do not set their own.
    pub stall_timeout_ms: Option<u64>,
    /// Auto-restarts allowed per session.
    pub max_restarts: u32,
    /// Bound on the unparsed output buffer.
    pub output_buffer_bytes: usize,
    /// Normalized lines kept for `logs`.
    pub log_lines: usize,
    /// How long a completion signal must hold before busy → ready.
    pub debounce_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub confidence: ConfidenceWeights,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            ready_timeout_ms: 30_000,
            stop_timeout_ms: 5_000,
            response_timeout_ms: 120_000,
            stall_timeout_ms: None,
            max_restarts: 3,
            output_buffer_bytes: 64 * 1024,
            log_lines: 2_000,
            debounce_ms: 400,
            cols: 120,
            rows: 40,
            confidence: ConfidenceWeights::default(),
        }
    }
}

impl ManagerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Where worktrees are created, relative to the repository root.
    pub worktree_dir: PathBuf,
    /// Prefix for task branches.
    pub branch_prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            worktree_dir: PathBuf::from(".tether/worktrees"),
            branch_prefix: "tether/".to_string(),
        }
    }
}

impl TetherConfig {
    /// Loads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.manager;
        if m.max_sessions == 0 {
            return Err(ConfigError::Invalid("manager.max_sessions must be at least 1".into()));
        }
        if m.cols == 0 || m.rows == 0 {
            return Err(ConfigError::Invalid("manager.cols and manager.rows must be non-zero".into()));
        }
        if m.output_buffer_bytes < 1024 {
            return Err(ConfigError::Invalid(
                "manager.output_buffer_bytes must be at least 1024".into(),
            ));
        }
        if self.workspace.branch_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace.branch_prefix must not be empty".into()));
        }
        Ok(())
    }
}

/// Rejects spawn configs that cannot produce a working session.
pub fn validate_spawn_config(config: &SpawnConfig) -> Result<(), ConfigError> {
    if config.name.trim().is_empty() {
        return Err(ConfigError::Invalid("name must not be empty".into()));
    }
    if config.agent_type.trim().is_empty() {
        return Err(ConfigError::Invalid("type must not be empty".into()));
    }
    if config.cols == Some(0) || config.rows == Some(0) {
        return Err(ConfigError::Invalid("terminal size must be non-zero".into()));
    }
    if let Some(workdir) = &config.workdir
        && !workdir.is_dir()
    {
        return Err(ConfigError::Invalid(format!(
            "workdir {} is not a directory",
            workdir.display()
        )));
    }
    for rule in &config.rule_overrides {
        Regex::new(&rule.pattern).map_err(|e| {
            ConfigError::Invalid(format!("rule override '{}' has an invalid pattern: {e}", rule.description))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::{AutoResponseRule, BlockingPromptCategory};

    #[test]
    fn test_defaults() {
        let config = TetherConfig::default();
        assert_eq!(config.manager.max_sessions, 10);
        assert_eq!(config.manager.debounce_ms, 400);
        assert_eq!(config.manager.output_buffer_bytes, 65_536);
        assert_eq!(config.workspace.branch_prefix, "tether/");
        assert_eq!(config.workspace.worktree_dir, PathBuf::from(".tether/worktrees"));
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = TetherConfig::parse("manager:\n  max_sessions: 2\n  debounce_ms: 50\n").unwrap();
        assert_eq!(config.manager.max_sessions, 2);
        assert_eq!(config.manager.debounce_ms, 50);
        assert_eq!(config.manager.stop_timeout_ms, 5_000);
        assert_eq!(config.workspace, WorkspaceConfig::default());
    }

    #[test]
    fn test_empty_and_missing_files() {
        assert_eq!(TetherConfig::parse("").unwrap(), TetherConfig::default());
        let dir = tempfile::TempDir::new().unwrap();
        let config = TetherConfig::load_or_default(dir.path().join("tether.yml")).unwrap();
        assert_eq!(config, TetherConfig::default());
    }

    #[test]
    fn test_load_reports_path_on_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tether.yml");
        std::fs::write(&path, "manager: [not, a, map]").unwrap();
        let err = TetherConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(TetherConfig::parse("manager:\n  max_sessions: 0\n").is_err());
    }

    #[test]
    fn test_spawn_config_validation() {
        assert!(validate_spawn_config(&SpawnConfig::new("a", "shell")).is_ok());
        assert!(validate_spawn_config(&SpawnConfig::new("", "shell")).is_err());
        assert!(validate_spawn_config(&SpawnConfig::new("a", " ")).is_err());

        let mut bad_rule = SpawnConfig::new("a", "shell");
        bad_rule.rule_overrides.push(AutoResponseRule::text(
            "([unclosed",
            BlockingPromptCategory::Update,
            "n",
            "broken",
        ));
        assert!(validate_spawn_config(&bad_rule).is_err());

        let missing_dir = SpawnConfig::new("a", "shell").with_workdir("/definitely/not/here");
        assert!(validate_spawn_config(&missing_dir).is_err());
    }
}
