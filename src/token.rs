//! Typed tokens found in recognized text: positional markers, group tags and
//! thousands-separated numbers, each with its byte span.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::PositionalKey;

/// Separators accepted between digit groups: comma, dot, narrow and thin space.
const GROUP_SEPARATORS: &str = ",.\u{202F}\u{2009}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Marker(PositionalKey),
    GroupTag(String),
    Number(NumberToken),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberToken {
    pub value: u64,
    /// Digits only, separators removed.
    pub digits: String,
    /// Matched only by the pattern that tolerates a missing leading separator.
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bK\s*[:;]\s*(\d{1,4})\s*,?\s*X\s*[:;]\s*(\d{1,4})\s*,?\s*Y\s*[:;]\s*(\d{1,4})")
            .expect("marker pattern is valid")
    })
}

fn group_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([A-Za-z0-9]{2,6})\]").expect("group tag pattern is valid"))
}

fn digit_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d[\d,.\x{202F}\x{2009}]*\d").expect("digit run pattern is valid")
    })
}

fn separated_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{1,3}(?:[,.\x{202F}\x{2009}]\d{3})+$").expect("number pattern is valid")
    })
}

fn fallback_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4,6}(?:[,.\x{202F}\x{2009}]\d{3})+$").expect("number pattern is valid")
    })
}

pub(crate) fn markers(text: &str) -> Vec<Token> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let zone = caps[1].parse().ok()?;
            let x = caps[2].parse().ok()?;
            let y = caps[3].parse().ok()?;
            Some(Token {
                kind: TokenKind::Marker(PositionalKey { zone, x, y }),
                span: whole.range(),
            })
        })
        .collect()
}

pub(crate) fn group_tags(text: &str) -> Vec<Token> {
    group_tag_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(Token {
                kind: TokenKind::GroupTag(caps[1].to_string()),
                span: whole.range(),
            })
        })
        .collect()
}

fn classify_run(run: &str) -> Option<NumberToken> {
    let fallback = if separated_regex().is_match(run) {
        false
    } else if fallback_regex().is_match(run) {
        true
    } else {
        return None;
    };
    let digits = run
        .chars()
        .filter(|ch| !GROUP_SEPARATORS.contains(*ch))
        .collect::<String>();
    let value = digits.parse().ok()?;
    Some(NumberToken {
        value,
        digits,
        fallback,
    })
}

/// Thousands-separated numbers in `text`, in reading order.
pub(crate) fn numbers(text: &str) -> Vec<Token> {
    digit_run_regex()
        .find_iter(text)
        .filter_map(|run| {
            classify_run(run.as_str()).map(|number| Token {
                kind: TokenKind::Number(number),
                span: run.range(),
            })
        })
        .collect()
}

/// All tokens of every kind, ordered by span start.
#[must_use]
pub fn scan(text: &str) -> Vec<Token> {
    let mut tokens = markers(text);
    tokens.extend(group_tags(text));
    tokens.extend(numbers(text));
    tokens.sort_by_key(|token| token.span.start);
    tokens
}
