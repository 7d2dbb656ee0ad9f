//! Interactive bash with a fixed prompt.

use std::collections::BTreeMap;
use tether_core::adapter::{content_above_prompt, parsed_from_content};
use tether_core::text;
use tether_core::{BlockingPromptClassifier, CliAdapter, InstallInfo};
use tether_proto::{
    ApprovalPreset, LoginDetection, ParsedOutput, PresetConfig, SpawnConfig,
};

/// Prompt the shell is started with; readiness is this exact suffix.
pub const SHELL_PROMPT: &str = "tether> ";

#[derive(Debug, Clone, Default)]
pub struct ShellAdapter {
    classifier: BlockingPromptClassifier,
}

impl ShellAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_prompt_line(line: &str) -> bool {
    line.trim_end() == SHELL_PROMPT.trim_end()
}

impl CliAdapter for ShellAdapter {
    fn adapter_type(&self) -> &str {
        "shell"
    }

    fn display_name(&self) -> &str {
        "Shell"
    }

    fn command(&self) -> &str {
        "bash"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        let mut args = vec!["--noprofile".to_string(), "--norc".to_string(), "-i".to_string()];
        args.extend(config.extra_args.iter().cloned());
        args
    }

    fn env(&self, _config: &SpawnConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("PS1".to_string(), SHELL_PROMPT.to_string()),
            ("PS2".to_string(), String::new()),
            ("HISTFILE".to_string(), "/dev/null".to_string()),
        ])
    }

    fn detect_login(&self, _output: &str) -> LoginDetection {
        LoginDetection::default()
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_ready(&self, output: &str) -> bool {
        is_prompt_line(text::last_line(output))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        content_above_prompt(output, is_prompt_line).map(parsed_from_content)
    }

    fn exit_sequence(&self) -> Option<&str> {
        Some("exit\r")
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "bash".to_string(),
            install_command: "Install bash with your system package manager".to_string(),
            docs_url: Some("https://www.gnu.org/software/bash/".to_string()),
        }
    }

    fn preset_config(&self, preset: ApprovalPreset) -> PresetConfig {
        PresetConfig::default().with_notes(format!(
            "The shell has no approval model; '{preset}' is recorded but not enforced"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_exact_prompt() {
        let adapter = ShellAdapter::new();
        assert!(adapter.detect_ready("ls\nCargo.toml\ntether> "));
        assert!(!adapter.detect_ready("Enter value> "));
        assert!(!adapter.detect_ready("not-tether> "));
    }

    #[test]
    fn test_parse_output_strips_prompt() {
        let adapter = ShellAdapter::new();
        let parsed = adapter
            .parse_output("echo hi\nhi\ntether> ")
            .unwrap();
        assert_eq!(parsed.content, "echo hi\nhi");
        assert!(adapter.parse_output("still running").is_none());
    }

    #[test]
    fn test_prompt_env() {
        let env = ShellAdapter::new().env(&SpawnConfig::new("n", "shell"));
        assert_eq!(env["PS1"], SHELL_PROMPT);
    }
}
