//! Claude Code (`claude`).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tether_core::adapter::parsed_from_content;
use tether_core::text;
use tether_core::{BlockingPromptClassifier, CliAdapter, InstallInfo, RuleSpec};
use tether_proto::{
    ApprovalPreset, AutoResponseRule, BlockingPromptCategory as Cat, LoginDetection, LoginMethod,
    ParsedOutput, PresetConfig, SpawnConfig,
};

use crate::common::{content_above, credential_env, launch_args};

const RULES: &[RuleSpec] = &[
    RuleSpec::new(Cat::Login, r"(?i)select login method"),
    RuleSpec::new(Cat::Login, r"(?i)please run /login"),
    RuleSpec::new(Cat::Login, r"(?i)paste code here if prompted"),
    RuleSpec::new(Cat::Tos, r"(?i)by continuing,? you agree"),
    RuleSpec::new(Cat::Permission, r"(?i)do you trust the files in this folder")
        .instructions("Confirm that Claude Code may read and edit files in the session workdir"),
    RuleSpec::new(Cat::Permission, r"(?i)\bdo you want to (?:make this edit to|create|run)\b"),
];

/// Input line inside the prompt box.
static INPUT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*│\s*>\s").expect("hardcoded regex"));

static SHORTCUTS_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?\s+for shortcuts").expect("hardcoded regex"));

static WORKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\besc to interrupt\b|^\s*[✻✽✢✶·*]\s+\w+…").expect("hardcoded regex")
});

static TURN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*[✻✽✢✶·*]\s+(?:worked|cooked|baked|brewed|churned|crunched) for \d+(?:m|s)")
        .expect("hardcoded regex")
});

static LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)select login method|please run /login|invalid api key|paste code here if prompted")
        .expect("hardcoded regex")
});

#[derive(Debug, Clone)]
pub struct ClaudeAdapter {
    classifier: BlockingPromptClassifier,
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self {
            classifier: BlockingPromptClassifier::base().with_rules(RULES),
        }
    }
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn presets(preset: ApprovalPreset) -> PresetConfig {
        match preset {
            ApprovalPreset::Readonly => PresetConfig::args(["--permission-mode", "plan"])
                .with_notes("Plan mode: Claude may read and propose but not edit or run commands"),
            ApprovalPreset::Standard => PresetConfig::args(["--permission-mode", "default"]),
            ApprovalPreset::Permissive => PresetConfig::args(["--permission-mode", "acceptEdits"]),
            ApprovalPreset::Autonomous => PresetConfig::args(["--dangerously-skip-permissions"])
                .with_notes("Skips every permission check; run inside an isolated workspace"),
        }
    }
}

impl CliAdapter for ClaudeAdapter {
    fn adapter_type(&self) -> &str {
        "claude"
    }

    fn display_name(&self) -> &str {
        "Claude Code"
    }

    fn command(&self) -> &str {
        "claude"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        launch_args(config, "--model", Self::presets)
    }

    fn env(&self, config: &SpawnConfig) -> BTreeMap<String, String> {
        credential_env(config, "ANTHROPIC_API_KEY", Self::presets)
    }

    fn detect_login(&self, output: &str) -> LoginDetection {
        let tail = text::tail(output, 15);
        if !LOGIN.is_match(tail) {
            return LoginDetection::default();
        }
        let url = text::extract_url(tail);
        let method = if url.is_some() {
            LoginMethod::Oauth
        } else if tail.to_lowercase().contains("api key") {
            LoginMethod::ApiKey
        } else {
            LoginMethod::Browser
        };
        LoginDetection::required(
            method,
            "Run `claude` interactively and complete /login, or set ANTHROPIC_API_KEY",
        )
        .with_url(url)
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_ready(&self, output: &str) -> bool {
        let tail = text::tail(output, 6);
        if WORKING.is_match(tail) {
            return false;
        }
        SHORTCUTS_HINT.is_match(tail) || tail.lines().any(|l| INPUT_LINE.is_match(l))
    }

    fn detect_loading(&self, output: &str) -> bool {
        WORKING.is_match(text::tail(output, 6))
    }

    fn detect_task_complete(&self, output: &str) -> bool {
        TURN_SUMMARY.is_match(text::tail(output, 12))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        if !self.detect_ready(output) {
            return None;
        }
        let lines: Vec<&str> = output.lines().collect();
        let prompt_idx = lines.iter().rposition(|l| INPUT_LINE.is_match(l)).or_else(|| {
            lines.iter().rposition(|l| SHORTCUTS_HINT.is_match(l))
        })?;
        content_above(&lines, prompt_idx, &['⏺']).map(parsed_from_content)
    }

    fn exit_sequence(&self) -> Option<&str> {
        Some("/exit\r")
    }

    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        vec![
            AutoResponseRule::keys(
                r"(?i)do you trust the files in this folder",
                Cat::Permission,
                "enter",
                "Trust the session workdir",
            ),
            AutoResponseRule::text(
                r"(?i)\bupdate available\b[^\n]*\(y/n\)",
                Cat::Update,
                "n",
                "Decline the update",
            ),
        ]
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "claude".to_string(),
            install_command: "npm install -g @anthropic-ai/claude-code".to_string(),
            docs_url: Some("https://docs.anthropic.com/en/docs/claude-code".to_string()),
        }
    }

    fn preset_config(&self, preset: ApprovalPreset) -> PresetConfig {
        Self::presets(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: &str = "╭──────────────────╮\n│ > Try \"fix lint\" │\n╰──────────────────╯\n  ? for shortcuts";

    #[test]
    fn test_ready_on_input_box() {
        let adapter = ClaudeAdapter::new();
        assert!(adapter.detect_ready(IDLE));
        assert!(!adapter.detect_ready("Enter value> "));
        assert!(!adapter.detect_ready("✻ Thinking… (esc to interrupt)"));
    }

    #[test]
    fn test_loading_and_complete() {
        let adapter = ClaudeAdapter::new();
        assert!(adapter.detect_loading("✶ Pondering… (3s · esc to interrupt)"));
        assert!(adapter.detect_task_complete("⏺ Done\n✻ Worked for 12s"));
        assert!(!adapter.detect_task_complete("⏺ Done"));
    }

    #[test]
    fn test_parse_output_above_box() {
        let adapter = ClaudeAdapter::new();
        let screen = format!("⏺ The build is green.\n\n{IDLE}");
        let parsed = adapter.parse_output(&screen).unwrap();
        assert_eq!(parsed.content, "The build is green.");
    }

    #[test]
    fn test_login_takes_priority() {
        let adapter = ClaudeAdapter::new();
        let screen = "Select login method:\n 1. Claude account with subscription\n 2. Anthropic Console account\nDo you want to proceed? (y/n)";
        let detection = adapter.detect_blocking_prompt(screen);
        assert_eq!(detection.category, Some(Cat::Login));
        assert!(!detection.can_auto_respond);
    }

    #[test]
    fn test_trust_prompt_is_permission() {
        let adapter = ClaudeAdapter::new();
        let detection =
            adapter.detect_blocking_prompt("Do you trust the files in this folder?\n❯ 1. Yes, proceed\n  2. No, exit");
        assert_eq!(detection.category, Some(Cat::Permission));
    }

    #[test]
    fn test_presets() {
        let adapter = ClaudeAdapter::new();
        let config = SpawnConfig::new("n", "claude").with_preset(ApprovalPreset::Permissive);
        assert_eq!(adapter.args(&config), ["--permission-mode", "acceptEdits"]);
    }
}
