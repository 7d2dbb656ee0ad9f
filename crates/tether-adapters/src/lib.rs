//! # tether-adapters
//!
//! Concrete [`CliAdapter`] implementations for the interactive coding tools
//! Tether can drive:
//! - Claude Code (`claude`)
//! - Gemini CLI (`gemini`)
//! - Codex CLI (`codex`)
//! - Aider (`aider`)
//! - A plain POSIX shell (`shell`), useful for smoke tests and scripted work
//!
//! Each adapter knows its tool's launch flags, screen phrases, blocking-prompt
//! rules and approval-preset translation. [`builtin_registry`] registers all
//! of them.

mod aider;
mod claude;
mod codex;
mod common;
mod gemini;
mod shell;

pub use aider::AiderAdapter;
pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;
pub use shell::{SHELL_PROMPT, ShellAdapter};

use std::sync::Arc;
use tether_core::{AdapterRegistry, CliAdapter};

/// Type tags of the built-in adapters, in registration order.
pub const BUILTIN_TYPES: [&str; 5] = ["shell", "claude", "gemini", "codex", "aider"];

/// Registry with every built-in adapter.
pub fn builtin_registry() -> AdapterRegistry {
    let adapters: [Arc<dyn CliAdapter>; 5] = [
        Arc::new(ShellAdapter::new()),
        Arc::new(ClaudeAdapter::new()),
        Arc::new(GeminiAdapter::new()),
        Arc::new(CodexAdapter::new()),
        Arc::new(AiderAdapter::new()),
    ];
    adapters
        .into_iter()
        .fold(AdapterRegistry::new(), AdapterRegistry::with)
}
