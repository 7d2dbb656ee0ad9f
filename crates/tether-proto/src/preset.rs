//! Approval presets: tool-independent levels of autonomy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPreset {
    /// Read and plan only; no edits, no commands.
    Readonly,
    /// The tool asks before edits and commands.
    Standard,
    /// Edits are accepted, commands still ask.
    Permissive,
    /// Nothing asks. Only for sandboxed workspaces.
    Autonomous,
}

impl ApprovalPreset {
    pub const ALL: [ApprovalPreset; 4] = [
        ApprovalPreset::Readonly,
        ApprovalPreset::Standard,
        ApprovalPreset::Permissive,
        ApprovalPreset::Autonomous,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalPreset::Readonly => "readonly",
            ApprovalPreset::Standard => "standard",
            ApprovalPreset::Permissive => "permissive",
            ApprovalPreset::Autonomous => "autonomous",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ApprovalPreset::Readonly => "Read-only analysis: the agent may read files but not edit or run commands",
            ApprovalPreset::Standard => "The agent asks for approval before editing files or running commands",
            ApprovalPreset::Permissive => "File edits are auto-approved; shell commands still require approval",
            ApprovalPreset::Autonomous => "Everything is auto-approved; use only in isolated workspaces",
        }
    }

    pub fn info(self) -> PresetInfo {
        PresetInfo {
            preset: self,
            description: self.description().to_string(),
        }
    }
}

impl std::fmt::Display for ApprovalPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApprovalPreset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown approval preset '{s}' (expected readonly, standard, permissive or autonomous)")
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetInfo {
    pub preset: ApprovalPreset,
    pub description: String,
}

/// Tool-specific translation of a preset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetConfig {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PresetConfig {
    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Autonomous".parse::<ApprovalPreset>(), Ok(ApprovalPreset::Autonomous));
        assert!("yolo".parse::<ApprovalPreset>().is_err());
    }
}
