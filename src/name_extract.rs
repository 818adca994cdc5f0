//! Pulls a clean identity out of recognized text, either up to a positional
//! marker on the same line or right after a group tag.

use crate::noise::is_noise;

pub(crate) const MIN_IDENTITY_LEN: usize = 2;
const MAX_LEVEL_BADGE_DIGITS: usize = 2;
const MIN_NUMERIC_NAME_PART: usize = 3;

/// Visually similar runs read in place of a trailing roman numeral.
const ROMAN_FIXES: &[(&str, &str)] = &[
    ("lll", "III"),
    ("Ill", "III"),
    ("IIl", "III"),
    ("IlI", "III"),
    ("lII", "III"),
    ("llI", "III"),
    ("lIl", "III"),
    ("111", "III"),
    ("ll", "II"),
    ("Il", "II"),
    ("lI", "II"),
    ("l", "I"),
];

fn is_allowed(ch: char) -> bool {
    ch.is_alphanumeric() || ch.is_whitespace() || matches!(ch, '_' | '-' | '.' | '\'')
}

fn clean(text: &str) -> String {
    text.chars().filter(|ch| is_allowed(*ch)).collect()
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn is_pure_digits(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|ch| ch.is_ascii_digit())
}

fn is_roman_like(token: &str) -> bool {
    char_len(token) <= 4 && token.chars().all(|ch| matches!(ch, 'I' | 'V' | 'X' | 'l' | '1'))
}

fn is_stray_lowercase(token: &str) -> bool {
    char_len(token) == 1
        && token.chars().all(char::is_lowercase)
        && !ROMAN_FIXES.iter().any(|(misread, _)| *misread == token)
}

fn normalize_roman_suffix(tokens: &mut [&str]) {
    if tokens.len() < 2 {
        return;
    }
    let last = tokens.len() - 1;
    if let Some((_, fixed)) = ROMAN_FIXES.iter().find(|(misread, _)| *misread == tokens[last]) {
        tokens[last] = *fixed;
    }
}

/// Remembers the most recent stripping stage long enough to be a name.
struct Candidates {
    last: Option<String>,
}

impl Candidates {
    fn observe(&mut self, tokens: &[&str]) {
        let joined = tokens.join(" ");
        if char_len(&joined) >= MIN_IDENTITY_LEN {
            self.last = Some(joined);
        }
    }

    fn finish(self, tokens: &mut [&str], raw: &str) -> Option<String> {
        normalize_roman_suffix(tokens);
        let joined = tokens.join(" ");
        if char_len(&joined) >= MIN_IDENTITY_LEN {
            return Some(joined);
        }
        if let Some(last) = self.last {
            return Some(last);
        }
        let raw = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        (char_len(&raw) >= MIN_IDENTITY_LEN).then_some(raw)
    }
}

/// Identity preceding a positional marker that starts at byte `anchor`.
#[must_use]
pub fn extract_anchored(text: &str, anchor: usize) -> Option<String> {
    let anchor = anchor.min(text.len());
    let prefix = text.get(..anchor)?;
    let line_start = prefix.rfind('\n').map_or(0, |index| index + 1);
    let cleaned = clean(&prefix[line_start..]);
    let mut tokens = cleaned.split_whitespace().collect::<Vec<_>>();

    let mut candidates = Candidates { last: None };
    candidates.observe(&tokens);
    while tokens.first().is_some_and(|token| is_noise(token)) {
        tokens.remove(0);
        candidates.observe(&tokens);
    }

    // A lone `l` is left for the roman-suffix fix.
    if tokens.len() > 1 && tokens.last().is_some_and(|token| is_stray_lowercase(token)) {
        tokens.pop();
    }

    candidates.finish(&mut tokens, &cleaned)
}

/// Identity in the text that follows a recognized group tag.
#[must_use]
pub fn extract_segment(text: &str) -> Option<String> {
    let first_line = text.lines().find(|line| !line.trim().is_empty())?;
    let cleaned = clean(first_line);
    let mut tokens = cleaned.split_whitespace().collect::<Vec<_>>();

    let mut candidates = Candidates { last: None };
    candidates.observe(&tokens);
    while tokens.first().is_some_and(|token| {
        is_noise(token) && !(is_pure_digits(token) && token.len() >= MIN_NUMERIC_NAME_PART)
    }) {
        tokens.remove(0);
        candidates.observe(&tokens);
    }

    if tokens.len() > 1
        && tokens
            .last()
            .is_some_and(|token| is_pure_digits(token) && token.len() <= MAX_LEVEL_BADGE_DIGITS)
    {
        tokens.pop();
        candidates.observe(&tokens);
    }

    while tokens
        .last()
        .is_some_and(|token| is_noise(token) && !is_pure_digits(token) && !is_roman_like(token))
    {
        tokens.pop();
        candidates.observe(&tokens);
    }

    candidates.finish(&mut tokens, &cleaned)
}
