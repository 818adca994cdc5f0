#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use image::{Rgb, RgbImage};
use roster_reconcile::{
    BackendError, CandidateRecord, Capture, Metrics, OcrBackend, PositionalKey, Recognition,
    RecognitionRequest, RegionKind,
};

pub const ROW_HEIGHT: u32 = 80;
pub const LEAD_IN: u32 = 40;

/// Light background with 2px dark divider lines at `lines`.
pub fn ruled_image(width: u32, height: u32, lines: &[u32]) -> RgbImage {
    RgbImage::from_fn(width, height, |_, y| {
        if lines.iter().any(|&line| y == line || y == line + 1) {
            Rgb([30, 30, 30])
        } else {
            Rgb([230, 230, 230])
        }
    })
}

/// A capture showing `rows` full member rows between a partial row at the
/// top and another at the bottom.
pub fn table_capture(id: &str, rows: u32) -> Capture {
    let lines = (0..=rows)
        .map(|row| LEAD_IN + row * ROW_HEIGHT)
        .collect::<Vec<_>>();
    let height = LEAD_IN * 2 + rows * ROW_HEIGHT;
    Capture::new(id, ruled_image(300, height, &lines))
}

pub fn blank_capture(id: &str) -> Capture {
    Capture::new(id, RgbImage::from_pixel(120, 120, Rgb([230, 230, 230])))
}

pub fn write_png(path: &Path, image: &RgbImage) -> Result<(), Box<dyn std::error::Error>> {
    image.save(path)?;
    Ok(())
}

pub fn keyed(identity: &str, score: u64, x: u32, y: u32) -> CandidateRecord {
    CandidateRecord::new(identity, Metrics::new().with("score", score))
        .with_key(PositionalKey { zone: 1, x, y })
}

/// Backend answering from canned responses per capture and row.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    full: HashMap<String, Recognition>,
    identity: HashMap<(String, usize), String>,
    numeric: HashMap<(String, usize), String>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full_text(mut self, capture: &str, text: &str) -> Self {
        self.full
            .insert(capture.to_string(), Recognition::Text(text.to_string()));
        self
    }

    pub fn full_records(mut self, capture: &str, records: Vec<CandidateRecord>) -> Self {
        self.full
            .insert(capture.to_string(), Recognition::Records(records));
        self
    }

    pub fn identity_row(mut self, capture: &str, row: usize, text: &str) -> Self {
        self.identity
            .insert((capture.to_string(), row), text.to_string());
        self
    }

    pub fn numeric_row(mut self, capture: &str, row: usize, text: &str) -> Self {
        self.numeric
            .insert((capture.to_string(), row), text.to_string());
        self
    }
}

impl OcrBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<Recognition, BackendError> {
        let capture = request.capture_id.to_string();
        let found = match request.region {
            RegionKind::FullCapture => self.full.get(&capture).cloned(),
            RegionKind::IdentityZone { row } => self
                .identity
                .get(&(capture.clone(), row))
                .cloned()
                .map(Recognition::Text),
            RegionKind::NumericZone { row } => self
                .numeric
                .get(&(capture.clone(), row))
                .cloned()
                .map(Recognition::Text),
        };
        found.ok_or_else(|| {
            BackendError::Failed(format!("nothing scripted for {capture} {:?}", request.region))
        })
    }
}
