//! Edit-distance helpers shared by the accumulator, the deduplicator and the
//! name corrector.

/// Identities at least this long tolerate two mismatches instead of one.
pub(crate) const LONG_IDENTITY_LEN: usize = 10;
/// Below this length the corrector allows a single edit.
pub(crate) const SHORT_NAME_LEN: usize = 5;

/// Levenshtein distance over characters.
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a = a.chars().collect::<Vec<_>>();
    let b = b.chars().collect::<Vec<_>>();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous = (0..=b.len()).collect::<Vec<_>>();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Positional mismatches between two equal-length strings, `None` otherwise.
#[must_use]
pub fn mismatch_count(a: &str, b: &str) -> Option<usize> {
    if a.chars().count() != b.chars().count() {
        return None;
    }
    Some(a.chars().zip(b.chars()).filter(|(x, y)| x != y).count())
}

/// Mismatch budget used when comparing two readings of one identity.
#[must_use]
pub fn fuzzy_threshold(len: usize) -> usize {
    if len >= LONG_IDENTITY_LEN { 2 } else { 1 }
}

/// Edit budget used when matching against a curated canonical name.
#[must_use]
pub fn correction_threshold(longer_len: usize) -> usize {
    if longer_len < SHORT_NAME_LEN { 1 } else { 2 }
}

#[must_use]
pub fn is_substring_either(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

#[must_use]
pub fn is_suffix_either(a: &str, b: &str) -> bool {
    a.ends_with(b) || b.ends_with(a)
}

/// Whether two identities read at the same position name the same entity:
/// identical, one contained in the other, or within the adaptive edit budget.
/// Comparison is case-insensitive.
#[must_use]
pub fn identities_similar(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b || is_substring_either(&a, &b) {
        return true;
    }
    let longer = a.chars().count().max(b.chars().count());
    levenshtein(&a, &b) <= fuzzy_threshold(longer)
}
