//! Detection results returned by adapter heuristics.
//!
//! Detection never fails. Every check returns a typed result, with the
//! negative case expressed as `detected: false` (or `required: false`).

use serde::{Deserialize, Serialize};

/// Category of a prompt that blocks the tool until someone answers it.
///
/// Variants are declared in classification priority order: when text matches
/// several categories, the earliest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingPromptCategory {
    Login,
    Update,
    Tos,
    ModelSelect,
    ProjectSelect,
    Permission,
    YesNo,
    Unknown,
}

impl BlockingPromptCategory {
    /// All categories in priority order.
    pub const PRIORITY: [BlockingPromptCategory; 8] = [
        BlockingPromptCategory::Login,
        BlockingPromptCategory::Update,
        BlockingPromptCategory::Tos,
        BlockingPromptCategory::ModelSelect,
        BlockingPromptCategory::ProjectSelect,
        BlockingPromptCategory::Permission,
        BlockingPromptCategory::YesNo,
        BlockingPromptCategory::Unknown,
    ];

    /// Categories that are never answered automatically, whatever the rule says.
    pub fn is_never_auto(self) -> bool {
        matches!(
            self,
            BlockingPromptCategory::Login
                | BlockingPromptCategory::Tos
                | BlockingPromptCategory::ModelSelect
                | BlockingPromptCategory::ProjectSelect
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockingPromptCategory::Login => "login",
            BlockingPromptCategory::Update => "update",
            BlockingPromptCategory::Tos => "tos",
            BlockingPromptCategory::ModelSelect => "model_select",
            BlockingPromptCategory::ProjectSelect => "project_select",
            BlockingPromptCategory::Permission => "permission",
            BlockingPromptCategory::YesNo => "yes_no",
            BlockingPromptCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BlockingPromptCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying the tail of a session's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingPromptDetection {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<BlockingPromptCategory>,
    /// Excerpt of the prompt text as it appeared on screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_response: Option<String>,
    pub can_auto_respond: bool,
    /// What a human should do, set when the prompt cannot be answered automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl BlockingPromptDetection {
    /// A negative detection.
    pub fn none() -> Self {
        Self {
            detected: false,
            category: None,
            prompt: None,
            options: Vec::new(),
            suggested_response: None,
            can_auto_respond: false,
            instructions: None,
            url: None,
        }
    }

    /// A positive detection of `category` with the given prompt excerpt.
    pub fn found(category: BlockingPromptCategory, prompt: impl Into<String>) -> Self {
        Self {
            detected: true,
            category: Some(category),
            prompt: Some(prompt.into()),
            ..Self::none()
        }
    }

    pub fn is_category(&self, category: BlockingPromptCategory) -> bool {
        self.detected && self.category == Some(category)
    }
}

impl Default for BlockingPromptDetection {
    fn default() -> Self {
        Self::none()
    }
}

/// How the tool expects the user to authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMethod {
    ApiKey,
    Oauth,
    Browser,
    DeviceCode,
}

/// Result of checking output for an authentication requirement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginDetection {
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<LoginMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl LoginDetection {
    pub fn required(method: LoginMethod, instructions: impl Into<String>) -> Self {
        Self {
            required: true,
            method: Some(method),
            url: None,
            instructions: Some(instructions.into()),
        }
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }
}

/// Result of checking output for a crash or exit message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitDetection {
    pub exited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExitDetection {
    pub fn exited(code: Option<i32>, reason: impl Into<String>) -> Self {
        Self {
            exited: true,
            code,
            reason: Some(reason.into()),
        }
    }
}

/// How an auto-response is written to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Literal text followed by a carriage return.
    #[default]
    Text,
    /// Whitespace-separated key names (`down enter`), each mapped to its key sequence.
    Keys,
}

/// One entry of the auto-response table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoResponseRule {
    /// Regex source, matched against the normalized prompt text.
    pub pattern: String,
    pub category: BlockingPromptCategory,
    pub response: String,
    #[serde(default)]
    pub response_type: ResponseType,
    pub description: String,
    /// Rules not marked safe are never fired.
    #[serde(default)]
    pub safe: bool,
}

impl AutoResponseRule {
    pub fn text(
        pattern: impl Into<String>,
        category: BlockingPromptCategory,
        response: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            category,
            response: response.into(),
            response_type: ResponseType::Text,
            description: description.into(),
            safe: true,
        }
    }

    pub fn keys(
        pattern: impl Into<String>,
        category: BlockingPromptCategory,
        keys: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            response_type: ResponseType::Keys,
            ..Self::text(pattern, category, keys, description)
        }
    }

    pub fn unsafe_rule(mut self) -> Self {
        self.safe = false;
        self
    }
}
