//! Gemini CLI (`gemini`).

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tether_core::adapter::parsed_from_content;
use tether_core::text;
use tether_core::{BlockingPromptClassifier, CliAdapter, InstallInfo, RuleSpec};
use tether_proto::{
    ApprovalPreset, AutoResponseRule, BlockingPromptCategory as Cat, BlockingPromptDetection,
    LoginDetection, LoginMethod, ParsedOutput, PresetConfig, SpawnConfig,
};

use crate::common::{content_above, credential_env, detect_with_notices, launch_args};

const RULES: &[RuleSpec] = &[
    RuleSpec::new(Cat::Login, r"(?i)how would you like to authenticate"),
    RuleSpec::new(Cat::Login, r"(?i)waiting for auth"),
    RuleSpec::new(Cat::Login, r"(?i)login with google"),
    RuleSpec::new(Cat::Permission, r"(?i)do you trust this folder"),
    RuleSpec::new(Cat::Permission, r"(?i)\ballow execution\b"),
    RuleSpec::new(Cat::Permission, r"(?i)\bapply this change\b"),
];

static INPUT_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)type your message").expect("hardcoded regex"));

static WORKING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(esc to cancel").expect("hardcoded regex"));

static LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)how would you like to authenticate|waiting for auth|login with google|gemini_api_key (?:is )?not set")
        .expect("hardcoded regex")
});

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    classifier: BlockingPromptClassifier,
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self {
            classifier: BlockingPromptClassifier::base().with_rules(RULES),
        }
    }
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn presets(preset: ApprovalPreset) -> PresetConfig {
        match preset {
            ApprovalPreset::Readonly => {
                PresetConfig::args(["--approval-mode", "default", "--sandbox"])
                    .with_notes("Every tool call needs approval and runs sandboxed")
            }
            ApprovalPreset::Standard => PresetConfig::args(["--approval-mode", "default"]),
            ApprovalPreset::Permissive => PresetConfig::args(["--approval-mode", "auto_edit"]),
            ApprovalPreset::Autonomous => PresetConfig::args(["--approval-mode", "yolo"]),
        }
    }
}

impl CliAdapter for GeminiAdapter {
    fn adapter_type(&self) -> &str {
        "gemini"
    }

    fn display_name(&self) -> &str {
        "Gemini CLI"
    }

    fn command(&self) -> &str {
        "gemini"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        launch_args(config, "--model", Self::presets)
    }

    fn env(&self, config: &SpawnConfig) -> BTreeMap<String, String> {
        credential_env(config, "GEMINI_API_KEY", Self::presets)
    }

    fn detect_login(&self, output: &str) -> LoginDetection {
        let tail = text::tail(output, 15);
        if !LOGIN.is_match(tail) {
            return LoginDetection::default();
        }
        let method = if tail.to_lowercase().contains("api_key") {
            LoginMethod::ApiKey
        } else {
            LoginMethod::Oauth
        };
        LoginDetection::required(method, "Sign in with Google in an interactive `gemini` run, or set GEMINI_API_KEY")
            .with_url(text::extract_url(tail))
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_blocking_prompt(&self, output: &str) -> BlockingPromptDetection {
        detect_with_notices(self, output)
    }

    fn detect_ready(&self, output: &str) -> bool {
        let tail = text::tail(output, 6);
        !WORKING.is_match(tail) && INPUT_HINT.is_match(tail)
    }

    fn detect_loading(&self, output: &str) -> bool {
        WORKING.is_match(text::tail(output, 6))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        if !self.detect_ready(output) {
            return None;
        }
        let lines: Vec<&str> = output.lines().collect();
        let prompt_idx = lines.iter().rposition(|l| INPUT_HINT.is_match(l))?;
        content_above(&lines, prompt_idx, &['✦']).map(parsed_from_content)
    }

    fn exit_sequence(&self) -> Option<&str> {
        Some("/quit\r")
    }

    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        vec![AutoResponseRule::keys(
            r"(?i)do you trust this folder",
            Cat::Permission,
            "enter",
            "Trust the session workdir",
        )]
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "gemini".to_string(),
            install_command: "npm install -g @google/gemini-cli".to_string(),
            docs_url: Some("https://github.com/google-gemini/gemini-cli".to_string()),
        }
    }

    fn preset_config(&self, preset: ApprovalPreset) -> PresetConfig {
        Self::presets(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: &str = "╭────────────────────────────╮\n│ >   Type your message or @path/to/file │\n╰────────────────────────────╯";

    #[test]
    fn test_ready_and_loading() {
        let adapter = GeminiAdapter::new();
        assert!(adapter.detect_ready(IDLE));
        assert!(!adapter.detect_ready("Enter value> "));
        assert!(adapter.detect_loading("⠋ Reading files (esc to cancel, 2s)"));
    }

    #[test]
    fn test_update_banner_does_not_block_input() {
        let adapter = GeminiAdapter::new();
        let screen = format!("Gemini CLI update available! 0.1.0 → 0.2.0\n{IDLE}");
        assert!(!adapter.detect_blocking_prompt(&screen).detected);
    }

    #[test]
    fn test_auth_menu_is_login() {
        let adapter = GeminiAdapter::new();
        let detection = adapter
            .detect_blocking_prompt("How would you like to authenticate for this project?\n● 1. Login with Google\n  2. Use Gemini API Key");
        assert_eq!(detection.category, Some(Cat::Login));
    }

    #[test]
    fn test_parse_output() {
        let adapter = GeminiAdapter::new();
        let screen = format!("✦ Two files changed.\n{IDLE}");
        assert_eq!(adapter.parse_output(&screen).unwrap().content, "Two files changed.");
    }

    #[test]
    fn test_yolo_preset() {
        let config = SpawnConfig::new("n", "gemini").with_preset(ApprovalPreset::Autonomous);
        assert_eq!(GeminiAdapter::new().args(&config), ["--approval-mode", "yolo"]);
    }
}
