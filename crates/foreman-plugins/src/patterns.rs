//! Pattern matching for terminal-tail analysis.

use regex::Regex;
use std::sync::OnceLock;

/// A named, compiled pattern.
#[derive(Debug)]
pub struct Pattern {
    /// Human-readable name, used in trace output.
    pub name: &'static str,
    regex: Regex,
}

impl Pattern {
    pub fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("invalid builtin pattern"),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Returns the first matching pattern, if any.
pub fn first_match<'a>(text: &str, patterns: &'a [Pattern]) -> Option<&'a Pattern> {
    patterns.iter().find(|p| p.matches(text))
}

/// Checks if any pattern in the set matches.
pub fn any_match(text: &str, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| p.matches(text))
}

/// Patterns for claude-code terminal output.
pub mod claude_code {
    use super::*;

    /// The agent asked something and waits for a human.
    pub fn waiting_patterns() -> &'static [Pattern] {
        static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            vec![
                Pattern::new("question", r"(?i)do you want"),
                Pattern::new("confirm", r"(?im)^\s*❯?\s*(yes|no),? (and )?"),
                Pattern::new("waiting", r"(?i)waiting for (your )?input"),
                Pattern::new("permission", r"(?i)grant permission|allow this"),
            ]
        })
    }

    /// The agent is mid-task.
    pub fn active_patterns() -> &'static [Pattern] {
        static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            vec![
                Pattern::new("interrupt_hint", r"(?i)esc to interrupt"),
                Pattern::new("spinner", r"(?i)(thinking|pondering|working)…?"),
                Pattern::new("tool_run", r"(?i)(running|executing|reading|writing)\b"),
            ]
        })
    }

    /// The agent cannot proceed without outside help.
    pub fn blocked_patterns() -> &'static [Pattern] {
        static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            vec![
                Pattern::new("rate_limit", r"(?i)rate.?limit"),
                Pattern::new("auth", r"(?i)(please )?(log ?in|authenticate)"),
                Pattern::new("usage", r"(?i)usage limit reached"),
            ]
        })
    }

    /// The agent sits at an empty prompt.
    pub fn idle_patterns() -> &'static [Pattern] {
        static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            vec![
                Pattern::new("prompt", r"(?m)^\s*[>❯]\s*$"),
                Pattern::new("ready", r"(?i)ready\s*$"),
            ]
        })
    }
}
