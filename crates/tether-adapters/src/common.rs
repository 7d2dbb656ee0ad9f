//! Helpers shared by the adapters.

use std::collections::BTreeMap;
use tether_core::{CLASSIFY_TAIL_LINES, CliAdapter, text};
use tether_proto::{
    ApprovalPreset, BlockingPromptCategory, BlockingPromptDetection, PresetConfig, SpawnConfig,
};
use tracing::debug;

/// Model flag, preset flags, then the caller's extra arguments.
pub(crate) fn launch_args(
    config: &SpawnConfig,
    model_flag: &str,
    preset: impl Fn(ApprovalPreset) -> PresetConfig,
) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(model) = &config.model {
        args.push(model_flag.to_string());
        args.push(model.clone());
    }
    if let Some(p) = config.approval_preset {
        args.extend(preset(p).args);
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

/// Credential variable plus whatever the selected preset sets.
pub(crate) fn credential_env(
    config: &SpawnConfig,
    key_var: &str,
    preset: impl Fn(ApprovalPreset) -> PresetConfig,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if let Some(key) = &config.api_key {
        env.insert(key_var.to_string(), key.clone());
    }
    if let Some(p) = config.approval_preset {
        env.extend(preset(p).env);
    }
    env
}

/// An update banner is informational once the tool is back at its input prompt.
fn drop_update_notice(
    detection: BlockingPromptDetection,
    at_input_prompt: bool,
) -> BlockingPromptDetection {
    if at_input_prompt && detection.is_category(BlockingPromptCategory::Update) {
        debug!(prompt = ?detection.prompt, "Ignoring update notice above the input prompt");
        BlockingPromptDetection::none()
    } else {
        detection
    }
}

/// Login first, then the classifier, ignoring update banners and unknown
/// prompt-like lines while the tool's own input prompt is showing.
///
/// For tools that print update notices above a live input box instead of
/// asking.
pub(crate) fn detect_with_notices(
    adapter: &impl CliAdapter,
    output: &str,
) -> BlockingPromptDetection {
    let login = adapter.detect_login(output);
    if login.required {
        let tail = text::tail(output, CLASSIFY_TAIL_LINES);
        let mut detection = BlockingPromptDetection::found(
            BlockingPromptCategory::Login,
            text::last_line(tail).trim(),
        );
        detection.url = login.url.or_else(|| text::extract_url(tail));
        detection.instructions = login.instructions;
        return detection;
    }
    let ready = adapter.detect_ready(output);
    let detection = drop_update_notice(adapter.classifier().classify(output), ready);
    if ready && detection.is_category(BlockingPromptCategory::Unknown) {
        return BlockingPromptDetection::none();
    }
    detection
}

/// Box edges and horizontal rules drawn around input areas.
pub(crate) fn is_frame(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '─' | '━' | '╭' | '╮' | '╰' | '╯' | '│' | '-' | ' '))
}

/// Text above the input area whose prompt line is `lines[prompt_idx]`.
///
/// Frame lines directly above the prompt belong to the input area. Leading
/// bullet glyphs the tool draws before its replies are removed.
pub(crate) fn content_above(lines: &[&str], prompt_idx: usize, bullets: &[char]) -> Option<String> {
    let mut start = prompt_idx;
    while start > 0 && is_frame(lines[start - 1]) {
        start -= 1;
    }
    let content = lines[..start]
        .iter()
        .map(|line| {
            let trimmed = line.trim_end();
            match trimmed.trim_start().strip_prefix(bullets) {
                Some(rest) => rest.trim_start(),
                None => trimmed,
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    let content = content.trim_matches('\n');
    if content.trim().is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_order() {
        let mut config = SpawnConfig::new("n", "x").with_preset(ApprovalPreset::Autonomous);
        config.model = Some("m1".into());
        config.extra_args = vec!["--verbose".into()];
        let args = launch_args(&config, "--model", |_| PresetConfig::args(["--yes"]));
        assert_eq!(args, ["--model", "m1", "--yes", "--verbose"]);
    }

    #[test]
    fn test_content_above_skips_frame_and_bullets() {
        let lines = ["⏺ Done.", "All tests pass.", "╭────╮", "│ > │"];
        let content = content_above(&lines, 3, &['⏺']).unwrap();
        assert_eq!(content, "Done.\nAll tests pass.");
        assert!(content_above(&lines[2..], 1, &[]).is_none());
    }
}
