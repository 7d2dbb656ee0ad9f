//! Terminal text normalization.
//!
//! Every detector in this crate works on normalized text: escape sequences
//! removed, hyperlinks reduced to their visible label, cursor-forward motion
//! turned into spaces, and line endings folded to `\n`.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// `CSI n C` (cursor forward). TUIs use it instead of spaces to lay out text.
static CURSOR_FORWARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[(\d*)C").expect("hardcoded regex")
});

static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'`\x1b)\]]+"#).expect("hardcoded regex")
});

/// Upper bound for a single cursor-forward expansion.
const MAX_CURSOR_FORWARD: usize = 512;

/// Stands in for `\t` while escapes are stripped; `strip_ansi_escapes`
/// drops tabs along with the other C0 controls.
const TAB_MARK: char = '\u{E009}';

/// Converts raw terminal bytes to plain text.
pub fn normalize(bytes: &[u8]) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    let spaced = expand_cursor_forward(&lossy).replace('\t', &TAB_MARK.to_string());
    let stripped = strip_ansi_escapes::strip(spaced.as_bytes());
    let text = String::from_utf8_lossy(&stripped);

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    out.push('\n');
                }
            }
            '\n' | '\t' => out.push(c),
            TAB_MARK => out.push('\t'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn expand_cursor_forward(text: &str) -> Cow<'_, str> {
    CURSOR_FORWARD.replace_all(text, |caps: &regex::Captures<'_>| {
        let n = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_CURSOR_FORWARD);
        " ".repeat(n)
    })
}

/// Returns the last `lines` lines of `text`.
pub fn tail(text: &str, lines: usize) -> &str {
    if lines == 0 {
        return "";
    }
    let trimmed = text.trim_end_matches('\n');
    match trimmed.rmatch_indices('\n').nth(lines - 1) {
        Some((idx, _)) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Returns the last non-empty line, with trailing whitespace preserved.
pub fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
}

/// Returns the first http(s) URL in `text`, without trailing punctuation.
pub fn extract_url(text: &str) -> Option<String> {
    URL.find(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
}

/// Truncates to `max_chars` characters, appending "..." when something was cut.
///
/// ```
/// use tether_core::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
/// assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
/// ```
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(s.len());
        format!("{}...", &s[..byte_idx])
    }
}
