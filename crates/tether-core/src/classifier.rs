//! Blocking-prompt classification.
//!
//! A prompt is "blocking" when the tool will not make progress until someone
//! answers it. The classifier looks at the last lines of normalized output and
//! decides which kind of prompt (if any) is on screen. It never writes to the
//! terminal; applying auto-responses is the session's job.
//!
//! Rules are grouped by category and evaluated in priority order (login first,
//! unknown last). Within a category, adapter rules are tried before the base
//! rules shared by every tool.

use crate::text;
use regex::Regex;
use std::sync::LazyLock;
use tether_proto::{BlockingPromptCategory, BlockingPromptDetection};
use tracing::warn;

/// How many trailing lines of output are considered.
pub const CLASSIFY_TAIL_LINES: usize = 20;

const PROMPT_EXCERPT_CHARS: usize = 200;

/// Uncompiled rule, declared as a constant table by adapters.
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub category: BlockingPromptCategory,
    pub pattern: &'static str,
    /// Whether answering with `response` is considered low-risk.
    pub safe: bool,
    pub response: Option<&'static str>,
    pub instructions: Option<&'static str>,
}

impl RuleSpec {
    pub const fn new(category: BlockingPromptCategory, pattern: &'static str) -> Self {
        Self {
            category,
            pattern,
            safe: false,
            response: None,
            instructions: None,
        }
    }

    pub const fn safe(mut self, response: &'static str) -> Self {
        self.safe = true;
        self.response = Some(response);
        self
    }

    pub const fn instructions(mut self, instructions: &'static str) -> Self {
        self.instructions = Some(instructions);
        self
    }
}

#[derive(Debug, Clone)]
struct PromptRule {
    category: BlockingPromptCategory,
    regex: Regex,
    safe: bool,
    response: Option<String>,
    instructions: Option<String>,
}

fn compile(specs: &[RuleSpec]) -> Vec<PromptRule> {
    specs
        .iter()
        .filter_map(|spec| match Regex::new(spec.pattern) {
            Ok(regex) => Some(PromptRule {
                category: spec.category,
                regex,
                safe: spec.safe,
                response: spec.response.map(str::to_string),
                instructions: spec.instructions.map(str::to_string),
            }),
            Err(e) => {
                warn!(pattern = spec.pattern, error = %e, "Skipping invalid prompt rule");
                None
            }
        })
        .collect()
}

use BlockingPromptCategory as Cat;

const BASE_RULES: &[RuleSpec] = &[
    // Login
    RuleSpec::new(Cat::Login, r"(?i)\b(?:log\s?in|sign\s?in)\b[^\n]*\b(?:to continue|required|with your)\b"),
    RuleSpec::new(Cat::Login, r"(?i)\bnot (?:logged|signed) in\b"),
    RuleSpec::new(Cat::Login, r"(?i)\bauthentication (?:is )?(?:required|failed|expired)\b"),
    RuleSpec::new(Cat::Login, r"(?i)\b(?:invalid|missing|no)\s+api[\s_-]?key\b"),
    RuleSpec::new(Cat::Login, r"(?i)\b(?:select|choose)\s+(?:a\s+|your\s+)?(?:login|sign-in|auth(?:entication)?)\s+method\b"),
    RuleSpec::new(Cat::Login, r"(?i)\benter\s+(?:your\s+|the\s+)?(?:api key|verification code|device code|one-time code)\b"),
    RuleSpec::new(Cat::Login, r"(?i)\b(?:open|visit)\b[^\n]*\bto (?:authenticate|log ?in|sign ?in|authorize)\b"),
    // Update
    RuleSpec::new(Cat::Update, r"(?i)\b(?:update|upgrade) (?:is )?available\b").safe("n"),
    RuleSpec::new(Cat::Update, r"(?i)\bnew version\b[^\n]*\bavailable\b").safe("n"),
    RuleSpec::new(Cat::Update, r"(?i)\bwould you like to (?:update|upgrade)\b").safe("n"),
    // Terms of service
    RuleSpec::new(Cat::Tos, r"(?i)\bterms of (?:service|use)\b"),
    RuleSpec::new(Cat::Tos, r"(?i)\b(?:accept|agree to) (?:the |our )?(?:terms|license|privacy policy)\b"),
    // Model selection
    RuleSpec::new(Cat::ModelSelect, r"(?i)\b(?:select|choose|pick) (?:a |your |the )?(?:default )?model\b"),
    RuleSpec::new(Cat::ModelSelect, r"(?i)\b(?:try|switch to) (?:the )?new (?:default )?model\b"),
    // Project selection
    RuleSpec::new(Cat::ProjectSelect, r"(?i)\b(?:select|choose|pick) (?:a |your |the )?(?:project|workspace|organization|org)\b"),
    RuleSpec::new(Cat::ProjectSelect, r"(?i)\bwhich (?:project|workspace|organization)\b"),
    // Permission
    RuleSpec::new(Cat::Permission, r"(?i)\bdo you want to (?:proceed|allow|run|make this edit|create|edit|execute|apply)\b"),
    RuleSpec::new(Cat::Permission, r"(?i)\ballow (?:this|once|always|for this session)\b"),
    RuleSpec::new(Cat::Permission, r"(?i)\b(?:grant|requires?|requesting) permission\b"),
    RuleSpec::new(Cat::Permission, r"(?i)\bapprove (?:this|the) (?:command|action|change|edit)\b"),
    // Generic yes/no
    RuleSpec::new(Cat::YesNo, r"(?i)\((?:y/n|yes/no)\)"),
    RuleSpec::new(Cat::YesNo, r"(?i)\[(?:y/n)\]"),
    RuleSpec::new(Cat::YesNo, r"(?im)\b(?:continue|proceed|are you sure)\?\s*$"),
];

static BASE: LazyLock<Vec<PromptRule>> = LazyLock::new(|| compile(BASE_RULES));

static YES_NO_OPTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\(\[](y(?:es)?)\s*/\s*(n(?:o)?)[\)\]]").expect("hardcoded regex")
});

static MENU_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[❯›>▸*]\s*)?(\d{1,2})[.)]\s+(\S.*?)\s*$").expect("hardcoded regex")
});

/// A line that looks like it is waiting for input: ends with `?`, `:` or `>`.
static PROMPT_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S.{0,118}?[?:>]\s*$").expect("hardcoded regex"));

fn default_instructions(category: BlockingPromptCategory) -> &'static str {
    match category {
        Cat::Login => "Authentication required: complete the tool's login flow (or supply an API key) and resume the session",
        Cat::Update => "The tool offers an update; decline it or update the tool outside the session",
        Cat::Tos => "Review and accept the terms of service manually; they are never accepted automatically",
        Cat::ModelSelect => "Choose a model manually; model and tier selection is never answered automatically",
        Cat::ProjectSelect => "Select the project or workspace manually",
        Cat::Permission => "Approve or deny the requested action",
        Cat::YesNo => "Answer the yes/no question",
        Cat::Unknown => "Unrecognized prompt; inspect the session output and respond manually",
    }
}

/// Ordered rule table: adapter rules followed by the shared base rules.
#[derive(Debug, Clone)]
pub struct BlockingPromptClassifier {
    rules: Vec<PromptRule>,
}

impl Default for BlockingPromptClassifier {
    fn default() -> Self {
        Self::base()
    }
}

impl BlockingPromptClassifier {
    /// Classifier with only the shared base rules.
    pub fn base() -> Self {
        Self {
            rules: BASE.clone(),
        }
    }

    /// Prepends tool-specific rules so they win within their category.
    pub fn with_rules(mut self, specs: &[RuleSpec]) -> Self {
        let mut rules = compile(specs);
        rules.append(&mut self.rules);
        self.rules = rules;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classifies the tail of `output` (already normalized).
    pub fn classify(&self, output: &str) -> BlockingPromptDetection {
        let tail = text::tail(output, CLASSIFY_TAIL_LINES);
        if tail.trim().is_empty() {
            return BlockingPromptDetection::none();
        }

        for category in BlockingPromptCategory::PRIORITY {
            if category == Cat::Unknown {
                break;
            }
            if let Some((rule, start)) = self
                .rules
                .iter()
                .filter(|r| r.category == category)
                .find_map(|r| r.regex.find(tail).map(|m| (r, m.start())))
            {
                return self.build(tail, rule, start);
            }
        }

        let last = text::last_line(tail);
        if PROMPT_LIKE.is_match(last) {
            let mut detection = BlockingPromptDetection::found(Cat::Unknown, last.trim());
            detection.options = extract_options(tail);
            detection.instructions = Some(default_instructions(Cat::Unknown).to_string());
            detection.url = text::extract_url(tail);
            return detection;
        }

        BlockingPromptDetection::none()
    }

    fn build(&self, tail: &str, rule: &PromptRule, start: usize) -> BlockingPromptDetection {
        let category = rule.category;
        let mut detection = BlockingPromptDetection::found(category, excerpt(tail, start));
        detection.options = extract_options(tail);
        detection.url = text::extract_url(tail);
        detection.can_auto_respond = rule.safe && !category.is_never_auto();
        detection.suggested_response = rule.response.clone();
        if !detection.can_auto_respond {
            detection.instructions = Some(
                rule.instructions
                    .clone()
                    .unwrap_or_else(|| default_instructions(category).to_string()),
            );
        }
        detection
    }
}

/// The line containing `start`, plus the prompt's trailing question line if any.
fn excerpt(tail: &str, start: usize) -> String {
    let line_start = tail[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = tail[start..].find('\n').map_or(tail.len(), |i| start + i);
    text::truncate_with_ellipsis(tail[line_start..line_end].trim(), PROMPT_EXCERPT_CHARS)
}

/// Yes/no choices or numbered menu entries visible in the tail.
fn extract_options(tail: &str) -> Vec<String> {
    if let Some(caps) = YES_NO_OPTIONS.captures(tail) {
        return [1, 2]
            .iter()
            .filter_map(|&i| caps.get(i).map(|m| m.as_str().to_lowercase()))
            .collect();
    }
    MENU_OPTION
        .captures_iter(tail)
        .filter_map(|caps| {
            let number = caps.get(1)?.as_str();
            let label = caps.get(2)?.as_str();
            Some(format!("{number}. {label}"))
        })
        .collect()
}
