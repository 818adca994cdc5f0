use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// How rows are handed to the OCR backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionMode {
    /// One backend call per capture; text is parsed for every anchor it holds.
    FullCapture,
    /// One call per member row crop, plus an optional numeric-zone call.
    RowCrops,
}

impl FromStr for RecognitionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "full-capture" | "full" => Ok(Self::FullCapture),
            "row-crops" | "rows" => Ok(Self::RowCrops),
            other => Err(format!(
                "unknown recognition mode '{other}', expected full-capture or row-crops"
            )),
        }
    }
}

/// Which identity survives when one identity is a suffix of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuffixPolicy {
    /// Shorter identity if the leftover prefix is pure noise, else the longer.
    PreferClean,
    KeepLonger,
    KeepShorter,
}

impl FromStr for SuffixPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "prefer-clean" => Ok(Self::PreferClean),
            "keep-longer" => Ok(Self::KeepLonger),
            "keep-shorter" => Ok(Self::KeepShorter),
            other => Err(format!(
                "unknown suffix policy '{other}', expected prefer-clean, keep-longer or keep-shorter"
            )),
        }
    }
}

/// Horizontal slice of a row, in percent of its width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpan {
    pub start: f32,
    pub end: f32,
}

impl ZoneSpan {
    #[must_use]
    pub const fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Pixel columns `(x, width)` this span covers in an image `width` wide.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn columns(&self, width: u32) -> (u32, u32) {
        let x1 = ((width as f32 * self.start / 100.0).round() as u32).min(width);
        let x2 = ((width as f32 * self.end / 100.0).round() as u32).clamp(x1, width);
        (x1, x2 - x1)
    }
}

impl FromStr for ZoneSpan {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| format!("invalid zone '{spec}', expected start-end in percent"))?;
        let start: f32 = start
            .trim()
            .parse()
            .map_err(|_| format!("invalid zone start: '{start}'"))?;
        let end: f32 = end
            .trim()
            .parse()
            .map_err(|_| format!("invalid zone end: '{end}'"))?;
        if !(0.0..=100.0).contains(&start) || !(0.0..=100.0).contains(&end) {
            return Err("zone bounds must lie within 0-100".to_string());
        }
        if end <= start {
            return Err(format!("invalid zone '{spec}': end must exceed start"));
        }
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropZones {
    /// Name plus positional marker; the avatar/badge strip left of it is dropped.
    pub identity: ZoneSpan,
    pub numeric: ZoneSpan,
}

impl Default for CropZones {
    fn default() -> Self {
        Self {
            identity: ZoneSpan::new(13.0, 68.0),
            numeric: ZoneSpan::new(72.0, 93.0),
        }
    }
}

/// Divider detection and row classification thresholds. Distances are
/// fractions of image height so the same values work at any resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterOptions {
    pub brightness_delta: f32,
    pub neighbor_fraction: f32,
    pub cluster_fraction: f32,
    pub single_class_ratio: f32,
    pub boundary_factor: f32,
    pub sliver_fraction: f32,
    pub leading_header_tolerance: f32,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            brightness_delta: 40.0,
            neighbor_fraction: 0.006,
            cluster_fraction: 0.01,
            single_class_ratio: 1.5,
            boundary_factor: 1.25,
            sliver_fraction: 0.15,
            leading_header_tolerance: 0.30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    pub metric_names: Vec<String>,
    pub min_metric: u64,
    pub metric_window: usize,
    pub recognition: RecognitionMode,
    pub zones: CropZones,
    pub segmenter: SegmenterOptions,
    pub suffix_policy: SuffixPolicy,
    pub parallel: bool,
    pub max_threads: Option<usize>,
    pub backend_timeout_ms: u64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            metric_names: vec!["score".to_string()],
            min_metric: 1000,
            metric_window: 160,
            recognition: RecognitionMode::RowCrops,
            zones: CropZones::default(),
            segmenter: SegmenterOptions::default(),
            suffix_policy: SuffixPolicy::PreferClean,
            parallel: false,
            max_threads: None,
            backend_timeout_ms: 15_000,
        }
    }
}

impl ReconcileOptions {
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.metric_names.is_empty() {
            return Err(ReconcileError::InvalidOption(
                "at least one metric name is required".to_string(),
            ));
        }
        if self.metric_names.iter().any(|name| name.trim().is_empty()) {
            return Err(ReconcileError::InvalidOption(
                "metric names must be non-empty".to_string(),
            ));
        }
        if self.metric_window == 0 {
            return Err(ReconcileError::InvalidOption(
                "metric_window must be positive".to_string(),
            ));
        }
        if self.backend_timeout_ms == 0 {
            return Err(ReconcileError::InvalidOption(
                "backend_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_threads == Some(0) {
            return Err(ReconcileError::InvalidOption(
                "max_threads must be at least 1".to_string(),
            ));
        }
        let zones = [self.zones.identity, self.zones.numeric];
        if zones
            .iter()
            .any(|zone| zone.end <= zone.start || zone.start < 0.0 || zone.end > 100.0)
        {
            return Err(ReconcileError::InvalidOption(
                "crop zones must satisfy 0 <= start < end <= 100".to_string(),
            ));
        }
        let seg = &self.segmenter;
        if seg.brightness_delta <= 0.0
            || seg.neighbor_fraction <= 0.0
            || seg.cluster_fraction <= 0.0
            || seg.single_class_ratio <= 1.0
            || seg.boundary_factor < 1.0
        {
            return Err(ReconcileError::InvalidOption(
                "segmenter thresholds are out of range".to_string(),
            ));
        }
        Ok(())
    }
}
