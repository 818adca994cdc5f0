use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Identity derived from a recognized spatial marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionalKey {
    pub zone: u32,
    pub x: u32,
    pub y: u32,
}

impl PositionalKey {
    /// The coarse area this key belongs to; residual dedup only pairs records
    /// that share it.
    #[must_use]
    pub fn zone(&self) -> String {
        format!("K{}", self.zone)
    }
}

impl Display for PositionalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "K{}:{}:{}", self.zone, self.x, self.y)
    }
}

/// Number of decimal digits in a metric value; `0` counts as absent.
#[must_use]
pub fn digit_count(value: u64) -> u32 {
    if value == 0 { 0 } else { value.ilog10() + 1 }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(BTreeMap<String, u64>);

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: u64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: u64) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn all_zero(&self) -> bool {
        self.0.values().all(|value| *value == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// The only value of a single-metric record.
    #[must_use]
    pub fn single(&self) -> Option<u64> {
        if self.0.len() == 1 {
            self.0.values().next().copied()
        } else {
            None
        }
    }

    /// Folds `other` in metric by metric: the value with more decimal digits
    /// wins, ties keep the value already held.
    pub fn merge_best(&mut self, other: &Metrics) {
        for (name, &value) in &other.0 {
            let slot = self.0.entry(name.clone()).or_insert(0);
            if digit_count(value) > digit_count(*slot) {
                *slot = value;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualOverrides {
    #[serde(default)]
    pub identity: bool,
    #[serde(default)]
    pub metrics: bool,
}

/// One recognized row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positional_key: Option<PositionalKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub metrics: Metrics,
    #[serde(default)]
    pub provenance: BTreeSet<String>,
    #[serde(default)]
    pub overrides: ManualOverrides,
}

impl CandidateRecord {
    #[must_use]
    pub fn new(identity: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            identity: identity.into(),
            positional_key: None,
            group: None,
            metrics,
            provenance: BTreeSet::new(),
            overrides: ManualOverrides::default(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: PositionalKey) -> Self {
        self.positional_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, capture_id: impl Into<String>) -> Self {
        self.provenance.insert(capture_id.into());
        self
    }

    /// Key used to track a record across captures: the positional key when
    /// one was read, otherwise the lowercased identity.
    #[must_use]
    pub fn tracking_key(&self) -> String {
        self.positional_key
            .as_ref()
            .map_or_else(|| self.identity.to_lowercase(), ToString::to_string)
    }

    /// Positional zone or group tag, whichever is known.
    #[must_use]
    pub fn zone(&self) -> Option<String> {
        self.positional_key
            .as_ref()
            .map(PositionalKey::zone)
            .or_else(|| self.group.as_ref().map(|group| format!("[{group}]")))
    }

    /// Folds another reading of the same entity into this one. Provenance is
    /// unioned and metrics follow [`Metrics::merge_best`] unless pinned.
    pub fn absorb(&mut self, other: &CandidateRecord) {
        self.provenance.extend(other.provenance.iter().cloned());
        if other.overrides.metrics && !self.overrides.metrics {
            self.metrics = other.metrics.clone();
            self.overrides.metrics = true;
        } else if !self.overrides.metrics {
            self.metrics.merge_best(&other.metrics);
        }
        if self.positional_key.is_none() {
            self.positional_key.clone_from(&other.positional_key);
        }
        if self.group.is_none() {
            self.group.clone_from(&other.group);
        }
    }

    /// Replaces the identity unless it was pinned by a manual override.
    pub fn set_identity(&mut self, identity: &str) {
        if !self.overrides.identity {
            self.identity = identity.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Member,
    Header,
    Partial,
}

/// A horizontal band of one capture, classified by the row segmenter.
#[derive(Debug, Clone)]
pub struct RowRegion {
    pub kind: RowKind,
    pub vertical_start: u32,
    pub height: u32,
    pub pixels: RgbImage,
}

/// One screenshot taken at one scroll step.
#[derive(Debug, Clone)]
pub struct Capture {
    pub id: String,
    pub image: RgbImage,
}

impl Capture {
    #[must_use]
    pub fn new(id: impl Into<String>, image: RgbImage) -> Self {
        Self {
            id: id.into(),
            image,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CandidateRecord, Metrics, PositionalKey, digit_count};

    #[test]
    fn counts_digits_with_zero_as_absent() {
        assert_eq!(digit_count(0), 0);
        assert_eq!(digit_count(7), 1);
        assert_eq!(digit_count(1_922_130), 7);
    }

    #[test]
    fn merge_best_prefers_more_digits_and_keeps_ties() {
        let mut held = Metrics::new().with("score", 900).with("kills", 12_345);
        held.merge_best(&Metrics::new().with("score", 1000).with("kills", 54_321));
        assert_eq!(held.get("score"), 1000);
        assert_eq!(held.get("kills"), 12_345);
    }

    #[test]
    fn tracking_key_falls_back_to_lowercase_identity() {
        let keyed = CandidateRecord::new("Foo", Metrics::new()).with_key(
            PositionalKey {
                zone: 12,
                x: 300,
                y: 450,
            },
        );
        assert_eq!(keyed.tracking_key(), "K12:300:450");
        assert_eq!(
            CandidateRecord::new("Foo", Metrics::new()).tracking_key(),
            "foo"
        );
    }

    #[test]
    fn absorb_respects_pinned_metrics() {
        let mut pinned = CandidateRecord::new("Foo", Metrics::new().with("score", 5));
        pinned.overrides.metrics = true;
        pinned.absorb(&CandidateRecord::new("Foo", Metrics::new().with("score", 50_000)).with_source("b"));
        assert_eq!(pinned.metrics.get("score"), 5);
        assert!(pinned.provenance.contains("b"));
    }

    #[test]
    fn positional_key_is_plain_coordinates() {
        let key = PositionalKey {
            zone: 3,
            x: 40,
            y: 7,
        };
        assert_eq!(key.to_string(), "K3:40:7");
        assert_eq!(key.zone(), "K3");
        assert_eq!(
            serde_json::to_value(key).expect("key should serialize"),
            serde_json::json!({ "zone": 3, "x": 40, "y": 7 })
        );
    }
}
