//! Testing utilities: a scriptable adapter backed by `sh`.

use crate::adapter::{CliAdapter, InstallInfo, content_above_prompt, parsed_from_content};
use crate::classifier::BlockingPromptClassifier;
use crate::text;
use std::collections::BTreeMap;
use tether_proto::{
    AutoResponseRule, LoginDetection, LoginMethod, ParsedOutput, SpawnConfig,
};

/// Prompt printed by the default echo script.
pub const FAKE_PROMPT: &str = "fake> ";

/// Echo loop: prints the prompt, then `got: <line>` for every line read.
pub const ECHO_SCRIPT: &str =
    r#"printf 'fake> '; while IFS= read -r line; do printf 'got: %s\n' "$line"; printf 'fake> '; done"#;

/// Adapter that runs an arbitrary shell script and recognizes a fixed prompt.
#[derive(Debug, Clone)]
pub struct FakeAdapter {
    tag: String,
    script: String,
    ready_marker: String,
    loading_marker: Option<String>,
    complete_marker: Option<String>,
    login_marker: Option<String>,
    exit_sequence: Option<String>,
    rules: Vec<AutoResponseRule>,
    env: BTreeMap<String, String>,
    classifier: BlockingPromptClassifier,
}

impl FakeAdapter {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            script: ECHO_SCRIPT.to_string(),
            ready_marker: FAKE_PROMPT.to_string(),
            loading_marker: None,
            complete_marker: None,
            login_marker: None,
            exit_sequence: None,
            rules: Vec::new(),
            env: BTreeMap::new(),
            classifier: BlockingPromptClassifier::base(),
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = marker.into();
        self
    }

    pub fn with_loading_marker(mut self, marker: impl Into<String>) -> Self {
        self.loading_marker = Some(marker.into());
        self
    }

    pub fn with_complete_marker(mut self, marker: impl Into<String>) -> Self {
        self.complete_marker = Some(marker.into());
        self
    }

    pub fn with_login_marker(mut self, marker: impl Into<String>) -> Self {
        self.login_marker = Some(marker.into());
        self
    }

    pub fn with_exit_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.exit_sequence = Some(sequence.into());
        self
    }

    pub fn with_rule(mut self, rule: AutoResponseRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn is_prompt_line(&self, line: &str) -> bool {
        let marker = self.ready_marker.trim_end();
        !marker.is_empty() && line.trim_end().ends_with(marker)
    }
}

impl CliAdapter for FakeAdapter {
    fn adapter_type(&self) -> &str {
        &self.tag
    }

    fn display_name(&self) -> &str {
        "Fake"
    }

    fn command(&self) -> &str {
        "sh"
    }

    fn args(&self, config: &SpawnConfig) -> Vec<String> {
        let mut args = vec!["-c".to_string(), self.script.clone()];
        args.extend(config.extra_args.iter().cloned());
        args
    }

    fn env(&self, _config: &SpawnConfig) -> BTreeMap<String, String> {
        self.env.clone()
    }

    fn detect_login(&self, output: &str) -> LoginDetection {
        match &self.login_marker {
            Some(marker) if text::tail(output, 5).contains(marker.as_str()) => {
                LoginDetection::required(LoginMethod::Browser, "Log in through the fake tool")
                    .with_url(text::extract_url(output))
            }
            _ => LoginDetection::default(),
        }
    }

    fn classifier(&self) -> &BlockingPromptClassifier {
        &self.classifier
    }

    fn detect_ready(&self, output: &str) -> bool {
        self.is_prompt_line(text::last_line(output))
    }

    fn detect_loading(&self, output: &str) -> bool {
        self.loading_marker
            .as_deref()
            .is_some_and(|m| text::last_line(output).contains(m))
    }

    fn detect_task_complete(&self, output: &str) -> bool {
        self.complete_marker
            .as_deref()
            .is_some_and(|m| text::tail(output, 3).contains(m))
    }

    fn parse_output(&self, output: &str) -> Option<ParsedOutput> {
        content_above_prompt(output, |l| self.is_prompt_line(l)).map(parsed_from_content)
    }

    fn exit_sequence(&self) -> Option<&str> {
        self.exit_sequence.as_deref()
    }

    fn auto_response_rules(&self) -> Vec<AutoResponseRule> {
        self.rules.clone()
    }

    fn install_info(&self) -> InstallInfo {
        InstallInfo {
            command: "sh".to_string(),
            install_command: "(part of the base system)".to_string(),
            docs_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_ready_and_parse() {
        let adapter = FakeAdapter::new("x");
        assert!(adapter.detect_ready("banner\nfake> "));
        assert!(!adapter.detect_ready("Enter value> "));

        let parsed = adapter
            .parse_output("fake> hello\ngot: hello\nfake> ")
            .unwrap();
        assert_eq!(parsed.content, "fake> hello\ngot: hello");
    }

    #[test]
    fn test_fake_args_are_deterministic() {
        let adapter = FakeAdapter::new("x");
        let config = SpawnConfig::new("n", "x");
        assert_eq!(adapter.args(&config), adapter.args(&config));
        assert_eq!(adapter.args(&config)[0], "-c");
    }
}
