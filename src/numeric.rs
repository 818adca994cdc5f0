//! Metric extraction from a text window and reconciliation of two readings of
//! the same metric.

use serde::Serialize;

use crate::token::{NumberToken, TokenKind, numbers};

/// Trailing digits that must agree before a same-length pair is treated as a
/// leading-digit misread.
const MIN_TRAILING_MATCH: usize = 3;
/// A stray inserted digit or separator inflates a value roughly tenfold.
const INFLATION_RATIO: (u64, u64) = (5, 15);

/// The numbers in `window` that reach `floor`, primary pattern first; the
/// fallback pattern only fills in when too few primary matches exist.
#[must_use]
pub fn extract_metrics(window: &str, count: usize, floor: u64) -> Vec<NumberToken> {
    let mut primary = Vec::new();
    let mut all = Vec::new();
    for token in numbers(window) {
        let TokenKind::Number(number) = token.kind else {
            continue;
        };
        if number.value < floor {
            continue;
        }
        if !number.fallback {
            primary.push(number.clone());
        }
        all.push(number);
    }

    if primary.len() >= count {
        primary.truncate(count);
        return primary;
    }
    all.truncate(count);
    all
}

/// First metric in `window` at or above `floor`.
#[must_use]
pub fn extract_metric(window: &str, floor: u64) -> Option<NumberToken> {
    extract_metrics(window, 1, floor).into_iter().next()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    OneAbsent,
    LeadingDigitLoss,
    LeadingDigitMisread,
    InflatedReading,
    FirstSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub value: u64,
    pub rule: ResolutionRule,
}

/// Reconciles two independent readings of one metric. `first` is the reading
/// seen first and wins when no rule applies.
#[must_use]
pub fn resolve_conflict(first: u64, second: u64) -> Resolution {
    let pick = |value, rule| Resolution { value, rule };

    if first == 0 || second == 0 {
        return pick(first.max(second), ResolutionRule::OneAbsent);
    }

    let a = first.to_string();
    let b = second.to_string();
    let (larger, smaller) = if first >= second {
        (first, second)
    } else {
        (second, first)
    };

    if a.len() != b.len() {
        let (long, short, long_value) = if a.len() > b.len() {
            (&a, &b, first)
        } else {
            (&b, &a, second)
        };
        if long.ends_with(short.as_str()) {
            return pick(long_value, ResolutionRule::LeadingDigitLoss);
        }
    } else {
        let tail = MIN_TRAILING_MATCH.max(a.len().saturating_sub(2)).min(a.len());
        if a[a.len() - tail..] == b[b.len() - tail..] {
            return pick(larger, ResolutionRule::LeadingDigitMisread);
        }
    }

    let (low, high) = INFLATION_RATIO;
    if larger >= smaller.saturating_mul(low) && larger <= smaller.saturating_mul(high) {
        return pick(smaller, ResolutionRule::InflatedReading);
    }

    pick(first, ResolutionRule::FirstSeen)
}
