use std::collections::HashMap;

use tracing::warn;

use crate::model::CandidateRecord;
use crate::similarity::identities_similar;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted { key: String },
    Merged { key: String },
    /// A dissimilar identity already holds this position; the newcomer was
    /// stored under a disambiguated key.
    Collision {
        key: String,
        base_key: String,
        existing_identity: String,
    },
}

/// Running `key -> record` map for one run, in first-seen order.
#[derive(Debug, Default)]
pub struct Accumulator {
    entries: Vec<(String, CandidateRecord)>,
    positions: HashMap<String, usize>,
    /// Disambiguated keys created per base key.
    variants: HashMap<String, Vec<String>>,
    next_synthetic: u64,
}

fn merge_into(existing: &mut CandidateRecord, incoming: &CandidateRecord) {
    existing.absorb(incoming);
    let current = existing.identity.to_lowercase();
    let candidate = incoming.identity.to_lowercase();
    let cleaner = candidate.chars().count() < current.chars().count() && current.contains(&candidate);
    if cleaner || (incoming.overrides.identity && !existing.overrides.identity) {
        existing.identity.clone_from(&incoming.identity);
        existing.overrides.identity |= incoming.overrides.identity;
    }
}

impl Accumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &CandidateRecord)> {
        self.entries
            .iter()
            .map(|(key, record)| (key.as_str(), record))
    }

    #[must_use]
    pub fn into_records(self) -> Vec<CandidateRecord> {
        self.entries.into_iter().map(|(_, record)| record).collect()
    }

    fn insert(&mut self, key: String, record: CandidateRecord) {
        self.positions.insert(key.clone(), self.entries.len());
        self.entries.push((key, record));
    }

    pub fn add(&mut self, candidate: CandidateRecord) -> AddOutcome {
        let Some(base_key) = candidate.positional_key.as_ref().map(ToString::to_string) else {
            let key = format!("~{}", self.next_synthetic);
            self.next_synthetic += 1;
            self.insert(key.clone(), candidate);
            return AddOutcome::Inserted { key };
        };

        let Some(&base_position) = self.positions.get(&base_key) else {
            self.insert(base_key.clone(), candidate);
            return AddOutcome::Inserted { key: base_key };
        };

        let mut slots = vec![(base_key.clone(), base_position)];
        for variant in self.variants.get(&base_key).into_iter().flatten() {
            if let Some(&position) = self.positions.get(variant) {
                slots.push((variant.clone(), position));
            }
        }

        for (key, position) in slots {
            let existing = &mut self.entries[position].1;
            if identities_similar(&existing.identity, &candidate.identity) {
                merge_into(existing, &candidate);
                return AddOutcome::Merged { key };
            }
        }

        let existing_identity = self.entries[base_position].1.identity.clone();
        let variants = self.variants.entry(base_key.clone()).or_default();
        let key = format!("{base_key}#{}", variants.len() + 1);
        variants.push(key.clone());
        warn!(
            key = %base_key,
            existing = %existing_identity,
            incoming = %candidate.identity,
            "positional collision between dissimilar identities"
        );
        self.insert(key.clone(), candidate);
        AddOutcome::Collision {
            key,
            base_key,
            existing_identity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddOutcome, Accumulator};
    use crate::model::{CandidateRecord, Metrics, PositionalKey};

    fn at(identity: &str, score: u64, capture: &str) -> CandidateRecord {
        CandidateRecord::new(identity, Metrics::new().with("score", score))
            .with_key(PositionalKey {
                zone: 1,
                x: 10,
                y: 20,
            })
            .with_source(capture)
    }

    #[test]
    fn rereads_merge_with_digit_rule_and_cleaner_identity() {
        let mut accumulator = Accumulator::new();
        accumulator.add(at("AB DragonSlayer", 1000, "a"));
        let outcome = accumulator.add(at("DragonSlayer", 900, "b"));
        assert_eq!(outcome, AddOutcome::Merged { key: "K1:10:20".to_string() });

        let records = accumulator.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "DragonSlayer");
        assert_eq!(records[0].metrics.get("score"), 1000);
        assert_eq!(records[0].provenance.len(), 2);
    }

    #[test]
    fn dissimilar_identities_at_one_key_are_both_kept() {
        let mut accumulator = Accumulator::new();
        accumulator.add(at("Hatsch", 5000, "a"));
        let outcome = accumulator.add(at("nobs", 7000, "a"));
        assert_eq!(
            outcome,
            AddOutcome::Collision {
                key: "K1:10:20#1".to_string(),
                base_key: "K1:10:20".to_string(),
                existing_identity: "Hatsch".to_string(),
            }
        );
        // A later re-read of the second entity lands on its own entry.
        assert!(matches!(
            accumulator.add(at("Nobs", 7000, "b")),
            AddOutcome::Merged { .. }
        ));
        let keys = accumulator.records().map(|(key, _)| key.to_string()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["K1:10:20", "K1:10:20#1"]);
    }

    #[test]
    fn unkeyed_records_never_collide() {
        let mut accumulator = Accumulator::new();
        accumulator.add(CandidateRecord::new("Foo", Metrics::new()));
        accumulator.add(CandidateRecord::new("Foo", Metrics::new()));
        assert_eq!(accumulator.len(), 2);
    }
}
