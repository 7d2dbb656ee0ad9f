//! Health report: adapter installation checks plus session counts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tether_proto::SessionStatus;

use crate::adapter::CliAdapter;
use crate::registry::AdapterRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Installation check for one adapter's executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCheck {
    pub adapter_type: String,
    pub display_name: String,
    pub command: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdapterCheck {
    pub fn run(adapter: &dyn CliAdapter) -> Self {
        let installation = adapter.check_installation();
        let (status, message) = if installation.installed {
            (CheckStatus::Pass, None)
        } else {
            let install = adapter.install_info();
            // A missing tool only matters once someone spawns it.
            (
                CheckStatus::Warn,
                Some(format!(
                    "{} not found on PATH; install with: {}",
                    adapter.command(),
                    install.install_command
                )),
            )
        };
        Self {
            adapter_type: adapter.adapter_type().to_string(),
            display_name: adapter.display_name().to_string(),
            command: adapter.command().to_string(),
            status,
            path: installation.path,
            message,
        }
    }
}

/// Session totals at the time of the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub total: usize,
    /// Non-terminal sessions; these count against the ceiling.
    pub active: usize,
    pub by_status: BTreeMap<SessionStatus, usize>,
}

impl SessionCounts {
    pub fn from_statuses(statuses: impl IntoIterator<Item = SessionStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            if !status.is_terminal() {
                counts.active += 1;
            }
            *counts.by_status.entry(status).or_default() += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst status across all checks.
    pub status: CheckStatus,
    pub adapters: Vec<AdapterCheck>,
    pub sessions: SessionCounts,
    pub max_sessions: usize,
    pub open_workspaces: usize,
}

impl HealthReport {
    pub fn new(
        adapters: Vec<AdapterCheck>,
        sessions: SessionCounts,
        max_sessions: usize,
        open_workspaces: usize,
    ) -> Self {
        let mut status = adapters
            .iter()
            .map(|a| a.status)
            .max()
            .unwrap_or(CheckStatus::Pass);
        if sessions.active >= max_sessions {
            status = status.max(CheckStatus::Warn);
        }
        Self {
            status,
            adapters,
            sessions,
            max_sessions,
            open_workspaces,
        }
    }

    pub fn installed(&self) -> impl Iterator<Item = &AdapterCheck> {
        self.adapters.iter().filter(|a| a.status == CheckStatus::Pass)
    }
}

/// Runs the installation check for every registered adapter.
pub fn check_adapters(registry: &AdapterRegistry) -> Vec<AdapterCheck> {
    registry.all().map(|a| AdapterCheck::run(a.as_ref())).collect()
}
