//! Global duplicate sweep run once every capture has been accumulated.
//!
//! Each pass is a pure function over a snapshot of the record list and
//! returns the surviving records plus an audit of what it folded away.
//! Passes run cheapest first: exact identity, same-length fuzzy, noise
//! prefix, then the residual metric-based pairing.

use serde::Serialize;
use tracing::debug;

use crate::model::CandidateRecord;
use crate::noise::is_noise;
use crate::options::SuffixPolicy;
use crate::similarity::{fuzzy_threshold, is_substring_either, mismatch_count};

/// Upper bound on full sweeps; a sweep that removes nothing ends early.
const MAX_SWEEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPass {
    Exact,
    Fuzzy,
    NoisePrefix,
    Residual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedRecord {
    pub identity: String,
    pub kept_identity: String,
    pub pass: DedupPass,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub records: Vec<CandidateRecord>,
    pub removed: Vec<RemovedRecord>,
}

/// Which identity a merged pair keeps. The surviving record always sits at
/// the position of the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Earlier,
    Later,
}

fn fold_into(target: &mut CandidateRecord, other: &CandidateRecord, keep: Keep) {
    target.absorb(other);
    let take_other = match keep {
        Keep::Later => !target.overrides.identity,
        Keep::Earlier => other.overrides.identity && !target.overrides.identity,
    };
    if take_other {
        target.identity.clone_from(&other.identity);
        target.overrides.identity |= other.overrides.identity;
    }
}

fn longer_identity(a: &CandidateRecord, b: &CandidateRecord) -> Keep {
    if b.identity.chars().count() > a.identity.chars().count() {
        Keep::Later
    } else {
        Keep::Earlier
    }
}

/// Compares every surviving pair in list order and folds the later record
/// into the earlier one whenever `decide` matches them.
fn fold_pairs<F>(records: &[CandidateRecord], pass: DedupPass, decide: F) -> PassOutcome
where
    F: Fn(&CandidateRecord, &CandidateRecord) -> Option<Keep>,
{
    let mut slots = records.iter().cloned().map(Some).collect::<Vec<_>>();
    let mut removed = Vec::new();

    for i in 0..slots.len() {
        for j in (i + 1)..slots.len() {
            let keep = match (&slots[i], &slots[j]) {
                (Some(earlier), Some(later)) => decide(earlier, later),
                _ => None,
            };
            let Some(keep) = keep else {
                continue;
            };
            let Some(later) = slots[j].take() else {
                continue;
            };
            if let Some(earlier) = slots[i].as_mut() {
                fold_into(earlier, &later, keep);
                removed.push(RemovedRecord {
                    identity: later.identity.clone(),
                    kept_identity: earlier.identity.clone(),
                    pass,
                });
            }
        }
    }

    PassOutcome {
        records: slots.into_iter().flatten().collect(),
        removed,
    }
}

/// Pass 1: identities equal ignoring case.
#[must_use]
pub fn exact_pass(records: &[CandidateRecord]) -> PassOutcome {
    fold_pairs(records, DedupPass::Exact, |a, b| {
        (a.identity.to_lowercase() == b.identity.to_lowercase()).then_some(Keep::Earlier)
    })
}

/// Pass 2: same-length identities a few characters apart.
#[must_use]
pub fn fuzzy_pass(records: &[CandidateRecord]) -> PassOutcome {
    fold_pairs(records, DedupPass::Fuzzy, |a, b| {
        let left = a.identity.to_lowercase();
        let right = b.identity.to_lowercase();
        if is_substring_either(&left, &right) {
            return None;
        }
        let mismatches = mismatch_count(&left, &right)?;
        (mismatches <= fuzzy_threshold(left.chars().count())).then_some(Keep::Earlier)
    })
}

/// Pass 3: one identity ends with the other; the leftover prefix decides.
#[must_use]
pub fn noise_prefix_pass(records: &[CandidateRecord], policy: SuffixPolicy) -> PassOutcome {
    fold_pairs(records, DedupPass::NoisePrefix, |a, b| {
        let left = a.identity.to_lowercase();
        let right = b.identity.to_lowercase();
        if left == right {
            return None;
        }
        let (longer, shorter, longer_is_earlier) = if left.ends_with(&right) {
            (a, b, true)
        } else if right.ends_with(&left) {
            (b, a, false)
        } else {
            return None;
        };

        let prefix_len = longer
            .identity
            .chars()
            .count()
            .saturating_sub(shorter.identity.chars().count());
        let prefix = longer.identity.chars().take(prefix_len).collect::<String>();
        let keep_shorter = match policy {
            SuffixPolicy::PreferClean => prefix.split_whitespace().all(is_noise),
            SuffixPolicy::KeepLonger => false,
            SuffixPolicy::KeepShorter => true,
        };

        Some(if keep_shorter == longer_is_earlier {
            Keep::Later
        } else {
            Keep::Earlier
        })
    })
}

fn adjacent_duplicates(a: &CandidateRecord, b: &CandidateRecord) -> bool {
    match (a.metrics.len(), b.metrics.len()) {
        (1, 1) => match (a.metrics.single(), b.metrics.single()) {
            (Some(left), Some(right)) => left != 0 && left == right,
            _ => false,
        },
        (2, 2) => a.metrics == b.metrics && !a.metrics.all_zero(),
        _ => false,
    }
}

/// Pass 4: rows whose metrics agree exactly where identities never will.
#[must_use]
pub fn residual_pass(records: &[CandidateRecord]) -> PassOutcome {
    let mut adjacent = PassOutcome::default();
    for record in records {
        let previous = adjacent
            .records
            .last_mut()
            .filter(|previous| adjacent_duplicates(previous, record));
        if let Some(previous) = previous {
            let keep = longer_identity(previous, record);
            fold_into(previous, record, keep);
            adjacent.removed.push(RemovedRecord {
                identity: record.identity.clone(),
                kept_identity: previous.identity.clone(),
                pass: DedupPass::Residual,
            });
            continue;
        }
        adjacent.records.push(record.clone());
    }

    let mut scattered = fold_pairs(&adjacent.records, DedupPass::Residual, |a, b| {
        let (Some(left), Some(right)) = (a.metrics.single(), b.metrics.single()) else {
            return None;
        };
        let same_zone = matches!((a.zone(), b.zone()), (Some(x), Some(y)) if x == y);
        (left != 0 && left == right && same_zone).then(|| longer_identity(a, b))
    });
    adjacent.removed.append(&mut scattered.removed);
    PassOutcome {
        records: scattered.records,
        removed: adjacent.removed,
    }
}

fn sweep(records: &[CandidateRecord], policy: SuffixPolicy) -> PassOutcome {
    let mut exact = exact_pass(records);
    let mut fuzzy = fuzzy_pass(&exact.records);
    let mut prefix = noise_prefix_pass(&fuzzy.records, policy);
    let mut residual = residual_pass(&prefix.records);

    let mut removed = Vec::new();
    removed.append(&mut exact.removed);
    removed.append(&mut fuzzy.removed);
    removed.append(&mut prefix.removed);
    removed.append(&mut residual.removed);
    PassOutcome {
        records: residual.records,
        removed,
    }
}

/// Runs the four passes, repeating the sweep until it removes nothing so a
/// second call on the result is a no-op.
#[must_use]
pub fn deduplicate(records: &[CandidateRecord], policy: SuffixPolicy) -> PassOutcome {
    let mut outcome = PassOutcome {
        records: records.to_vec(),
        removed: Vec::new(),
    };
    for round in 1..=MAX_SWEEPS {
        let mut next = sweep(&outcome.records, policy);
        let settled = next.removed.is_empty();
        outcome.removed.append(&mut next.removed);
        outcome.records = next.records;
        debug!(
            round,
            remaining = outcome.records.len(),
            removed = outcome.removed.len(),
            "dedup sweep finished"
        );
        if settled {
            break;
        }
    }
    outcome
}
