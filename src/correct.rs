use serde::Serialize;

use crate::name_extract::MIN_IDENTITY_LEN;
use crate::registry::KnownIdentityRegistry;
use crate::similarity::{correction_threshold, is_suffix_either, levenshtein};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum CorrectionSource {
    Correction,
    Canonical,
    Fuzzy { distance: usize },
    Suffix,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corrected {
    pub name: String,
    pub source: CorrectionSource,
}

impl Corrected {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.source != CorrectionSource::Unchanged
    }
}

fn closest_canonical<'a>(
    raw: &str,
    registry: &'a KnownIdentityRegistry,
) -> Option<(&'a str, CorrectionSource)> {
    let lowered = raw.to_lowercase();
    let raw_len = lowered.chars().count();

    let fuzzy = registry
        .canonical_names()
        .iter()
        .filter_map(|name| {
            let candidate = name.to_lowercase();
            let longer = raw_len.max(candidate.chars().count());
            let distance = levenshtein(&lowered, &candidate);
            (distance <= correction_threshold(longer)).then_some((name.as_str(), distance))
        })
        .min_by_key(|(_, distance)| *distance);
    if let Some((name, distance)) = fuzzy {
        return Some((name, CorrectionSource::Fuzzy { distance }));
    }

    // Leftover noise in front of (or a truncated start of) a known name.
    registry
        .canonical_names()
        .iter()
        .filter(|name| is_suffix_either(&lowered, &name.to_lowercase()))
        .max_by_key(|name| name.chars().count())
        .map(|name| (name.as_str(), CorrectionSource::Suffix))
}

/// Resolves a raw identity to its canonical form using `registry`.
#[must_use]
pub fn correct_name(raw: &str, registry: &KnownIdentityRegistry) -> Corrected {
    let raw = raw.trim();
    // Too short to be a name; every known name would match it as a suffix.
    if raw.chars().count() < MIN_IDENTITY_LEN {
        return Corrected {
            name: raw.to_string(),
            source: CorrectionSource::Unchanged,
        };
    }

    if let Some(target) = registry.correction_for(raw) {
        let name = registry.canonical(target).unwrap_or(target);
        return Corrected {
            name: name.to_string(),
            source: CorrectionSource::Correction,
        };
    }

    if let Some(name) = registry.canonical(raw) {
        return Corrected {
            name: name.to_string(),
            source: CorrectionSource::Canonical,
        };
    }

    if let Some((name, source)) = closest_canonical(raw, registry) {
        return Corrected {
            name: name.to_string(),
            source,
        };
    }

    Corrected {
        name: raw.to_string(),
        source: CorrectionSource::Unchanged,
    }
}
