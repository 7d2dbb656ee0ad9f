//! The capability surface every wrapped CLI tool implements.
//!
//! An adapter knows how to launch its tool (command, arguments, environment)
//! and how to read its screen (login, blocking prompts, readiness, loading,
//! completion, exit). Detection methods receive normalized text and never
//! fail; they return typed results.

use crate::classifier::BlockingPromptClassifier;
use crate::text;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tether_proto::{
    ApprovalPreset, AutoResponseRule, BlockingPromptCategory, BlockingPromptDetection,
    ExitDetection, LoginDetection, ParsedOutput, PresetConfig, SpawnConfig,
};

/// How a user installs the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallInfo {
    pub command: String,
    pub install_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
}

/// Result of looking the tool up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

static EXIT_WITH_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^.*\b(?:process|program|agent|session)?\s*exited with (?:code|status) (-?\d+)\b.*$")
        .expect("hardcoded regex")
});

static CRASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:Segmentation fault(?: \(core dumped\))?|Killed|thread '[^']+' panicked at .*|panic: .*|Aborted(?: \(core dumped\))?)\s*$")
        .expect("hardcoded regex")
});

/// Exit and crash messages common to every tool, checked on the last few lines.
pub fn base_detect_exit(output: &str) -> ExitDetection {
    let tail = text::tail(output, 3);
    if let Some(caps) = EXIT_WITH_CODE.captures(tail) {
        let code = caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok());
        let reason = caps.get(0).map_or("", |m| m.as_str()).trim().to_string();
        return ExitDetection::exited(code, reason);
    }
    if let Some(m) = CRASH.find(tail) {
        return ExitDetection::exited(None, m.as_str().trim());
    }
    ExitDetection::default()
}

/// One wrapped CLI tool.
///
/// Implementations are stateless and shared between sessions; `args` and
/// `env` must be pure functions of the config.
pub trait CliAdapter: Send + Sync {
    /// Registry tag (e.g. `claude`).
    fn adapter_type(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Executable to launch.
    fn command(&self) -> &str;

    /// Arguments, including any approval-preset flags.
    fn args(&self, config: &SpawnConfig) -> Vec<String>;

    /// Environment the tool needs, applied before the config's own overrides.
    fn env(&self, config: &SpawnConfig) -> BTreeMap<String, String>;

    fn detect_login(&self, output: &str) -> LoginDetection;

    /// Rule table used by [`CliAdapter::detect_blocking_prompt`].
    fn classifier(&self) -> &BlockingPromptClassifier;

    /// Login first, then the classifier. An unknown prompt that is really the
    /// tool's own input prompt is not reported.
    fn detect_blocking_prompt(&self, output: &str) -> BlockingPromptDetection {
        let login = self.detect_login(output);
        if login.required {
            let tail = text::tail(output, crate::classifier::CLASSIFY_TAIL_LINES);
            let mut detection =
                BlockingPromptDetection::found(BlockingPromptCategory::Login, text::last_line(tail).trim());
            detection.url = login.url.or_else(|| text::extract_url(tail));
            detection.instructions = login.instructions;
            return detection;
        }
        let detection = self.classifier().classify(output);
        if detection.is_category(BlockingPromptCategory::Unknown) && self.detect_ready(output) {
            return BlockingPromptDetection::none();
        }
        detection
    }

    /// True when the tool is waiting at its own input prompt.
    fn detect_ready(&self, output: &str) -> bool;

    fn detect_exit(&self, output: &str) -> ExitDetection {
        base_detect_exit(output)
    }

    /// True while a spinner or "working" indicator is on screen.
    fn detect_loading(&self, _output: &str) -> bool {
        false
    }

    /// True when the tool prints an explicit end-of-turn marker.
    fn detect_task_complete(&self, _output: &str) -> bool {
        false
    }

    /// Returns a complete output unit, or `None` if more output is needed.
    fn parse_output(&self, output: &str) -> Option<ParsedOutput>;

    /// Adapts a message to the tool's input conventions. The session appends `\r`.
    fn format_input(&self, message: &str) -> String {
        message.to_string()
    }

    /// Bytes that ask the tool to quit, written on graceful stop.
    fn exit_sequence(&self) -> Option<&str> {
        None
    }

    /// Default auto-response table, evaluated after config overrides.
    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        Vec::new()
    }

    fn install_info(&self) -> InstallInfo;

    fn check_installation(&self) -> InstallationStatus {
        match which::which(self.command()) {
            Ok(path) => InstallationStatus {
                installed: true,
                path: Some(path),
                error: None,
            },
            Err(e) => InstallationStatus {
                installed: false,
                path: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Tool-specific translation of an approval preset.
    fn preset_config(&self, _preset: ApprovalPreset) -> PresetConfig {
        PresetConfig::default()
    }
}

impl std::fmt::Debug for dyn CliAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliAdapter")
            .field("type", &self.adapter_type())
            .field("command", &self.command())
            .finish()
    }
}

/// Strips a trailing prompt line and returns the text above it.
///
/// Helper for adapters whose output units end when their input prompt
/// reappears. `is_prompt` is called on each line from the bottom.
pub fn content_above_prompt(output: &str, is_prompt: impl Fn(&str) -> bool) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    let prompt_idx = lines.iter().rposition(|l| !l.trim().is_empty())?;
    if !is_prompt(lines[prompt_idx]) {
        return None;
    }
    let content = lines[..prompt_idx]
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let content = content.trim_matches('\n').to_string();
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Wraps content as a question when its last line asks one.
pub fn parsed_from_content(content: String) -> ParsedOutput {
    let asks = content
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.trim_end().ends_with('?'));
    if asks {
        ParsedOutput::question(content)
    } else {
        ParsedOutput::response(content)
    }
}
