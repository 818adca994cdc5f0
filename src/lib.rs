mod accumulate;
mod backend;
mod correct;
mod dedup;
mod error;
mod model;
mod name_extract;
mod noise;
mod numeric;
mod options;
mod overlap;
mod parse;
mod pipeline;
mod registry;
mod segment;
mod similarity;
mod token;
mod warning;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

pub use accumulate::{Accumulator, AddOutcome};
pub use backend::{
    BackendSet, OcrBackend, PrerecognizedBackend, Recognition, RecognitionRequest, RegionKind,
};
pub use correct::{Corrected, CorrectionSource, correct_name};
pub use dedup::{
    DedupPass, PassOutcome, RemovedRecord, deduplicate, exact_pass, fuzzy_pass,
    noise_prefix_pass, residual_pass,
};
pub use error::{BackendError, ReconcileError, RegistryError};
pub use model::{
    CandidateRecord, Capture, ManualOverrides, Metrics, PositionalKey, RowKind, RowRegion,
    digit_count,
};
pub use name_extract::{extract_anchored, extract_segment};
pub use noise::is_noise;
pub use numeric::{Resolution, ResolutionRule, extract_metric, extract_metrics, resolve_conflict};
pub use options::{
    CropZones, ReconcileOptions, RecognitionMode, SegmenterOptions, SuffixPolicy, ZoneSpan,
};
pub use overlap::{
    CoverageGap, OverlapReport, analyze_overlap, average_row_height, recommended_scroll_distance,
};
pub use parse::{candidates_from_row, candidates_from_text};
pub use pipeline::{
    CancelToken, ProgressEvent, ProgressFn, RunHooks, RunReport, reconcile_captures,
    revalidate_records,
};
pub use registry::{CurationAction, KnownIdentityRegistry, RegistryStore};
pub use segment::{
    Segmentation, Span, classify_spans, crop_zone, detect_dividers, row_luminance, segment_rows,
};
pub use similarity::{identities_similar, levenshtein};
pub use token::{NumberToken, Token, TokenKind, scan};
pub use warning::{RunWarning, WarningCode};

/// Capture list handed over by an external capture loop, with text already
/// recognized by an external OCR process. Relative paths resolve against the
/// manifest's own directory.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureManifest {
    pub captures: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub image: PathBuf,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub text_file: Option<PathBuf>,
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Loads every capture image named by the manifest at `path`, plus a backend
/// serving the recognized text recorded for each.
pub fn load_manifest(path: &Path) -> Result<(Vec<Capture>, PrerecognizedBackend), ReconcileError> {
    let manifest: CaptureManifest = serde_json::from_str(&fs::read_to_string(path)?)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut seen = HashSet::new();
    let mut captures = Vec::with_capacity(manifest.captures.len());
    let mut backend = PrerecognizedBackend::new();
    for entry in manifest.captures {
        if entry.id.trim().is_empty() {
            return Err(ReconcileError::InvalidManifest(
                "capture id must not be empty".to_string(),
            ));
        }
        if !seen.insert(entry.id.clone()) {
            return Err(ReconcileError::InvalidManifest(format!(
                "capture id '{}' appears more than once",
                entry.id
            )));
        }

        let image = image::open(resolve(base, &entry.image))?.to_rgb8();
        let text = match (entry.text, entry.text_file) {
            (Some(text), _) => Some(text),
            (None, Some(file)) => Some(fs::read_to_string(resolve(base, &file))?),
            (None, None) => None,
        };
        if let Some(text) = text {
            backend.insert(entry.id.clone(), text);
        }
        debug!(capture = %entry.id, width = image.width(), height = image.height(), "capture loaded");
        captures.push(Capture::new(entry.id, image));
    }
    Ok((captures, backend))
}

/// Reconciles the captures listed in `manifest` and writes the run report as
/// JSON to `output`.
pub fn reconcile_manifest_to_json(
    manifest: &Path,
    registry: &KnownIdentityRegistry,
    output: &Path,
    options: &ReconcileOptions,
) -> Result<RunReport, ReconcileError> {
    let (captures, backend) = load_manifest(manifest)?;
    let report = reconcile_captures(
        &captures,
        &BackendSet::single(Arc::new(backend)),
        registry,
        options,
        &RunHooks::default(),
    )?;

    if let Some(parent) = output.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, serde_json::to_string_pretty(&report)?)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    use super::{ReconcileError, load_manifest};
    use crate::backend::{OcrBackend, Recognition, RecognitionRequest, RegionKind};

    fn write_manifest(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        RgbImage::from_pixel(8, 8, Rgb([230, 230, 230]))
            .save(dir.join("cap.png"))
            .expect("image should be written");
        let path = dir.join("manifest.json");
        std::fs::write(&path, body).expect("manifest should be written");
        path
    }

    #[test]
    fn loads_images_and_text_relative_to_manifest() {
        let dir = tempdir().expect("tempdir should be created");
        std::fs::write(dir.path().join("cap.txt"), "Hatsch K:1 X:1 Y:1 10,000")
            .expect("text should be written");
        let path = write_manifest(
            dir.path(),
            r#"{"captures": [{"id": "cap-001", "image": "cap.png", "text_file": "cap.txt"}]}"#,
        );

        let (captures, backend) = load_manifest(&path).expect("manifest should load");
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].image.dimensions(), (8, 8));
        let request = RecognitionRequest {
            capture_id: "cap-001",
            region: RegionKind::FullCapture,
            image: &captures[0].image,
        };
        assert_eq!(
            backend.recognize(&request),
            Ok(Recognition::Text("Hatsch K:1 X:1 Y:1 10,000".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_and_blank_ids() {
        let dir = tempdir().expect("tempdir should be created");
        let path = write_manifest(
            dir.path(),
            r#"{"captures": [{"id": "a", "image": "cap.png"}, {"id": "a", "image": "cap.png"}]}"#,
        );
        assert!(matches!(
            load_manifest(&path),
            Err(ReconcileError::InvalidManifest(_))
        ));

        let path = write_manifest(dir.path(), r#"{"captures": [{"id": " ", "image": "cap.png"}]}"#);
        assert!(matches!(
            load_manifest(&path),
            Err(ReconcileError::InvalidManifest(_))
        ));
    }
}
