//! OpenAI Codex CLI (`codex`).

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
    RuleSpec::new(Cat::Login, r"(?i)sign in with chatgpt"),
    RuleSpec::new(Cat::Login, r"(?i)provide your own api key"),
    RuleSpec::new(Cat::Permission, r"(?i)allow codex to work in this folder"),
    RuleSpec::new(Cat::Permission, r"(?i)\bwould you like to (?:run the following command|make the following edits)\b"),
    RuleSpec::new(Cat::Permission, r"(?i)\byes, (?:proceed|allow)\b"),
];

/// Footer shown under the composer when it accepts input.
static COMPOSER_FOOTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)⏎\s*send|ctrl\s*\+?\s*j\s+newline|\d+% context left").expect("hardcoded regex")
});

static WORKING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)\besc to interrupt\b|^\s*(?:•\s*)?working\b").expect("hardcoded regex")
});

static LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)sign in with chatgpt|provide your own api key|openai_api_key (?:is )?not set")
        .expect("hardcoded regex")
});

/// `codex` footer token summary, e.g. `Token usage: total=1234`.
static TOKEN_USAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*token usage:").expect("hardcoded regex"));

#[derive(Debug, Clone)]
pub struct CodexAdapter {
    classifier: BlockingPromptClassifier,
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self {
            classifier: BlockingPromptClassifier::base().with_rules(RULES),
        }
    }
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn presets(preset: ApprovalPreset) -> PresetConfig {
        match preset {
            ApprovalPreset::Readonly => {
                PresetConfig::args(["--sandbox", "read-only", "--ask-for-approval", "on-request"])
            }
            ApprovalPreset::Standard => PresetConfig::args([
                "--sandbox",
                "workspace-write",
                "--ask-for-approval",
                "untrusted",
            ]),
            ApprovalPreset::Permissive => PresetConfig::args([
                "--sandbox",
                "workspace-write",
                "--ask-for-approval",
                "on-failure",
            ])
            .with_notes("Commands run sandboxed without asking; escalation needs approval"),
            ApprovalPreset::Autonomous => {
                PresetConfig::args(["--dangerously-bypass-approvals-and-sandbox"])
                    .with_notes("No sandbox and no approvals; run inside an isolated workspace")
            }
        }
    }
}

impl CliAdapter for CodexAdapter {
    fn adapter_type(&self) -> &str {
        "codex"
    }

    fn display_name(&self) -> &str {
        "Codex CLI"
    }

    fn command(&self) -> &str {
        "codex"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        launch_args(config, "--model", Self::presets)
    }

    fn env(&self, config: &SpawnConfig) -> BTreeMap<String, String> {
        credential_env(config, "OPENAI_API_KEY", Self::presets)
    }

    fn detect_login(&self, output: &str) -> LoginDetection {
        let tail = text::tail(output, 15);
        if !LOGIN.is_match(tail) {
            return LoginDetection::default();
        }
        let url = text::extract_url(tail);
        let method = if url.is_some() {
            LoginMethod::Browser
        } else {
            LoginMethod::ApiKey
        };
        LoginDetection::required(method, "Run `codex login`, or set OPENAI_API_KEY").with_url(url)
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_blocking_prompt(&self, output: &str) -> BlockingPromptDetection {
        detect_with_notices(self, output)
    }

    fn detect_ready(&self, output: &str) -> bool {
        let tail = text::tail(output, 6);
        !WORKING.is_match(tail) && COMPOSER_FOOTER.is_match(tail)
    }

    fn detect_loading(&self, output: &str) -> bool {
        WORKING.is_match(text::tail(output, 6))
    }

    fn detect_task_complete(&self, output: &str) -> bool {
        TOKEN_USAGE.is_match(text::tail(output, 8))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        if !self.detect_ready(output) {
            return None;
        }
        let lines: Vec<&str> = output
            .lines()
            .filter(|l| !TOKEN_USAGE.is_match(l))
            .collect();
        // The composer sits directly above its footer.
        let footer = lines.iter().rposition(|l| COMPOSER_FOOTER.is_match(l))?;
        let composer = lines[..footer]
            .iter()
            .rposition(|l| l.trim_start().starts_with(['▌', '›']))
            .unwrap_or(footer);
        content_above(&lines, composer, &['•']).map(parsed_from_content)
    }

    fn exit_sequence(&self) -> Option<&str> {
        Some("/quit\r")
    }

    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        vec![AutoResponseRule::keys(
            r"(?i)allow codex to work in this folder",
            Cat::Permission,
            "enter",
            "Trust the session workdir",
        )]
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "codex".to_string(),
            install_command: "npm install -g @openai/codex".to_string(),
            docs_url: Some("https://github.com/openai/codex".to_string()),
        }
    }

    fn preset_config(&self, preset: ApprovalPreset) -> PresetConfig {
        Self::presets(preset)
    }
}
