//! Dialogue: chat backend, rate limiting, and reply post-processing
//!
//! Replies carry inline style tags (`[EXCITED] Great news!`) that pick the
//! voice used for synthesis. Each tagged span becomes one [`DialogueTurn`].

mod chunking;
mod client;
mod engine;
mod retry;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use chunking::split_into_speakable;
pub use client::{ChatBackend, OpenAiChat};
pub use engine::DialogueEngine;
pub use retry::{RetryPolicy, classify_status, parse_retry_after};

/// Speaking style selected by the dialogue model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// General information
    #[default]
    Neutral,
    /// Good news, high energy
    Excited,
    /// Errors, warnings, bad news
    Serious,
    /// Casual confirmation
    Lazy,
}

impl Style {
    /// Parse a tag name, ignoring case
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "neutral" => Some(Self::Neutral),
            "excited" => Some(Self::Excited),
            "serious" => Some(Self::Serious),
            "lazy" => Some(Self::Lazy),
            _ => None,
        }
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Excited => "excited",
            Self::Serious => "serious",
            Self::Lazy => "lazy",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One styled piece of an assistant reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueTurn {
    /// Voice style
    pub style: Style,
    /// Plain text to speak
    pub text: String,
}

impl DialogueTurn {
    /// Create a turn
    #[must_use]
    pub fn new(style: Style, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }
}

static STYLE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(neutral|excited|serious|lazy)\]").expect("valid regex")
});

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`]*`").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));
static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").expect("valid regex"));
static ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*|\b_([^_\n]+)_\b").expect("valid regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]*").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Remove markdown that would be read out literally
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    let text = FENCED_CODE.replace_all(text, " ");
    let text = INLINE_CODE.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = BOLD.replace_all(&text, "$1$2");
    let text = ITALIC.replace_all(&text, "$1$2");
    let text = HEADING.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Split a raw reply into styled turns
///
/// Text before the first tag, or a reply with no tag at all, is neutral.
/// Spans left empty after markdown stripping are dropped.
#[must_use]
pub fn parse_reply(reply: &str) -> Vec<DialogueTurn> {
    let mut turns = Vec::new();
    let mut style = Style::Neutral;
    let mut start = 0;

    let mut push = |style: Style, span: &str| {
        let text = strip_markdown(span);
        if !text.is_empty() {
            turns.push(DialogueTurn { style, text });
        }
    };

    for captures in STYLE_TAG.captures_iter(reply) {
        let (Some(whole), Some(tag)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        push(style, &reply[start..whole.start()]);
        style = Style::from_tag(tag.as_str()).unwrap_or_default();
        start = whole.end();
    }
    push(style, &reply[start..]);

    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_tag() {
        let turns = parse_reply("[EXCITED] It worked!");
        assert_eq!(turns, vec![DialogueTurn::new(Style::Excited, "It worked!")]);
    }

    #[test]
    fn untagged_reply_is_neutral() {
        let turns = parse_reply("Just some text.");
        assert_eq!(turns, vec![DialogueTurn::new(Style::Neutral, "Just some text.")]);
    }

    #[test]
    fn tags_are_case_insensitive() {
        let turns = parse_reply("  [serious]\nThe build failed.");
        assert_eq!(turns[0].style, Style::Serious);
        assert_eq!(turns[0].text, "The build failed.");
    }

    #[test]
    fn multiple_tags_preserve_order() {
        let turns = parse_reply("Hmm. [SERIOUS] Bad news first. [EXCITED] But it's fixed! [LAZY] ok");
        let styles: Vec<Style> = turns.iter().map(|t| t.style).collect();
        assert_eq!(
            styles,
            vec![Style::Neutral, Style::Serious, Style::Excited, Style::Lazy]
        );
        assert_eq!(turns[1].text, "Bad news first.");
        assert_eq!(turns[3].text, "ok");
    }

    #[test]
    fn empty_spans_are_dropped() {
        let turns = parse_reply("[NEUTRAL][EXCITED]   [LAZY] fine");
        assert_eq!(turns, vec![DialogueTurn::new(Style::Lazy, "fine")]);
        assert!(parse_reply("").is_empty());
        assert!(parse_reply("[SERIOUS] ```\ncode\n```").is_empty());
    }

    #[test]
    fn unknown_bracket_text_is_kept() {
        let turns = parse_reply("[HAPPY] hello");
        assert_eq!(turns, vec![DialogueTurn::new(Style::Neutral, "[HAPPY] hello")]);
    }

    #[test]
    fn strips_markdown() {
        assert_eq!(strip_markdown("**bold** and *italic*"), "bold and italic");
        assert_eq!(strip_markdown("__strong__ _em_"), "strong em");
        assert_eq!(strip_markdown("## Heading\nBody"), "Heading Body");
        assert_eq!(strip_markdown("see [the docs](https://x.dev)"), "see the docs");
        assert_eq!(strip_markdown("run `cargo` now"), "run now");
        assert_eq!(
            strip_markdown("Before\n```rust\nfn main() {}\n```\nAfter"),
            "Before After"
        );
    }

    #[test]
    fn style_round_trips_through_config_names() {
        for style in [Style::Neutral, Style::Excited, Style::Serious, Style::Lazy] {
            assert_eq!(Style::from_tag(style.as_str()), Some(style));
            assert_eq!(Style::from_tag(&style.to_string().to_uppercase()), Some(style));
        }
    }
}
