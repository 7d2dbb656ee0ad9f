//! Aider (`aider`).
//!
//! Aider is line-oriented: it prints a horizontal rule and then its mode
//! prompt (`> `, `ask> `, `architect> `...). A bare `> ` is only treated as
//! the prompt when that rule sits directly above it, so tool output that
//! merely ends in `>` is never mistaken for readiness. Confirmations look
//! like `Create new file? (Y)es/(N)o [Yes]:`.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tether_core::adapter::parsed_from_content;
use tether_core::text;
use tether_core::{BlockingPromptClassifier, CliAdapter, InstallInfo, RuleSpec};
use tether_proto::{
    ApprovalPreset, AutoResponseRule, BlockingPromptCategory as Cat, BlockingPromptDetection,
    LoginDetection, LoginMethod, ParsedOutput, PresetConfig, SpawnConfig,
};

use crate::common::{content_above, detect_with_notices, is_frame, launch_args};

const RULES: &[RuleSpec] = &[
    RuleSpec::new(Cat::Login, r"(?i)login to openrouter"),
    RuleSpec::new(Cat::Update, r"(?i)newer aider version\b[^\n]*\bavailable").safe("n"),
    RuleSpec::new(Cat::Update, r"(?i)run pip install\?").safe("n"),
    RuleSpec::new(Cat::Permission, r"(?i)add \.aider\*? to \.gitignore").safe("y"),
    RuleSpec::new(Cat::Permission, r"(?i)open documentation url for more info\?").safe("n"),
    RuleSpec::new(Cat::Permission, r"(?i)\b(?:create new file|add (?:file|url|these files) to the chat|run shell commands?|edit the files)\b[^\n]*\?"),
    RuleSpec::new(Cat::YesNo, r"(?i)\(y\)es/\(n\)o"),
];

/// Mode prompt on its own line.
static MODE_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:ask|code|architect|help|context|multi)\s*)?>\s*$").expect("hardcoded regex")
});

static WAITING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwaiting for\b").expect("hardcoded regex"));

/// Per-turn usage line, printed once the reply is complete.
static TOKENS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^tokens:\s*([\d.,]+k?)\s+sent,\s*([\d.,]+k?)\s+received\b.*$")
        .expect("hardcoded regex")
});

static LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)login to openrouter|no api key|missing api key|api key (?:is )?(?:invalid|not set)")
        .expect("hardcoded regex")
});

#[derive(Debug, Clone)]
pub struct AiderAdapter {
    classifier: BlockingPromptClassifier,
}

impl Default for AiderAdapter {
    fn default() -> Self {
        Self {
            classifier: BlockingPromptClassifier::base().with_rules(RULES),
        }
    }
}

impl AiderAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn presets(preset: ApprovalPreset) -> PresetConfig {
        match preset {
            ApprovalPreset::Readonly => PresetConfig::args(["--dry-run", "--no-auto-commits"])
                .with_notes("Edits are shown but never written"),
            ApprovalPreset::Standard => PresetConfig::args(["--no-auto-commits"]),
            ApprovalPreset::Permissive => PresetConfig::args(["--yes-always", "--no-auto-commits"])
                .with_notes("Aider cannot separate edits from commands; every confirmation is accepted but nothing is committed"),
            ApprovalPreset::Autonomous => PresetConfig::args(["--yes-always"]),
        }
    }

    /// Credential variable for the provider the model name implies.
    fn key_var(config: &SpawnConfig) -> &'static str {
        match config.model.as_deref() {
            Some(m) if ["claude", "sonnet", "opus", "haiku", "anthropic/"]
                .iter()
                .any(|p| m.contains(p)) =>
            {
                "ANTHROPIC_API_KEY"
            }
            Some(m) if m.contains("gemini") => "GEMINI_API_KEY",
            Some(m) if m.starts_with("openrouter/") => "OPENROUTER_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    fn is_prompt_at(lines: &[&str], idx: usize) -> bool {
        MODE_PROMPT.is_match(lines[idx].trim_end_matches('\r'))
            && lines[..idx]
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| is_frame(l))
    }
}

impl CliAdapter for AiderAdapter {
    fn adapter_type(&self) -> &str {
        "aider"
    }

    fn display_name(&self) -> &str {
        "Aider"
    }

    fn command(&self) -> &str {
        "aider"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        let mut args = launch_args(config, "--model", Self::presets);
        args.push("--no-pretty".to_string());
        args
    }

    fn env(&self, config: &SpawnConfig) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([("AIDER_CHECK_UPDATE".to_string(), "false".to_string())]);
        if let Some(key) = &config.api_key {
            env.insert(Self::key_var(config).to_string(), key.clone());
        }
        if let Some(p) = config.approval_preset {
            env.extend(Self::presets(p).env);
        }
        env
    }

    fn detect_login(&self, output: &str) -> LoginDetection {
        let tail = text::tail(output, 10);
        if !LOGIN.is_match(tail) {
            return LoginDetection::default();
        }
        if tail.to_lowercase().contains("openrouter") {
            return LoginDetection::required(
                LoginMethod::Oauth,
                "Complete the OpenRouter login in a browser, or pass an API key",
            )
            .with_url(text::extract_url(tail));
        }
        LoginDetection::required(LoginMethod::ApiKey, "Set the provider API key for the selected model")
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_blocking_prompt(&self, output: &str) -> BlockingPromptDetection {
        detect_with_notices(self, output)
    }

    fn detect_ready(&self, output: &str) -> bool {
        let tail = text::tail(output, 4);
        let lines: Vec<&str> = tail.lines().collect();
        lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .is_some_and(|idx| Self::is_prompt_at(&lines, idx))
    }

    fn detect_loading(&self, output: &str) -> bool {
        WAITING.is_match(text::last_line(output))
    }

    fn detect_task_complete(&self, output: &str) -> bool {
        TOKENS.is_match(text::tail(output, 6))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        let lines: Vec<&str> = output.lines().collect();
        let prompt_idx = lines.iter().rposition(|l| !l.trim().is_empty())?;
        if !Self::is_prompt_at(&lines, prompt_idx) {
            return None;
        }

        let mut metadata = Map::new();
        if let Some(caps) = TOKENS.captures(output) {
            metadata.insert("tokensSent".to_string(), Value::String(caps[1].to_string()));
            metadata.insert("tokensReceived".to_string(), Value::String(caps[2].to_string()));
        }
        let kept: Vec<&str> = lines[..prompt_idx]
            .iter()
            .copied()
            .filter(|l| !TOKENS.is_match(l))
            .collect();
        let mut parsed = parsed_from_content(content_above(&kept, kept.len(), &[])?);
        parsed.metadata = metadata;
        Some(parsed)
    }

    /// Multi-line messages use aider's `{` ... `}` block syntax.
    fn format_input(&self, message: &str) -> String {
        if message.contains('\n') {
            format!("{{\n{message}\n}}")
        } else {
            message.to_string()
        }
    }

    fn exit_sequence(&self) -> Option<&str> {
        Some("/exit\r")
    }

    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        vec![
            AutoResponseRule::text(
                r"(?i)run pip install\?",
                Cat::Update,
                "n",
                "Decline the aider upgrade",
            ),
            AutoResponseRule::text(
                r"(?i)add \.aider\*? to \.gitignore",
                Cat::Permission,
                "y",
                "Keep aider's files out of git",
            ),
            AutoResponseRule::text(
                r"(?i)open documentation url for more info\?",
                Cat::Permission,
                "n",
                "Skip opening documentation in a browser",
            ),
        ]
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "aider".to_string(),
            install_command: "python -m pip install aider-install && aider-install".to_string(),
            docs_url: Some("https://aider.chat/docs/install.html".to_string()),
        }
    }

    fn preset_config(&self, preset: ApprovalPreset) -> PresetConfig {
        Self::presets(preset)
    }
}
