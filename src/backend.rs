//! The seam to optical recognition. Backends are swappable: one may return
//! raw text for pattern extraction, another finished candidate records.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::debug;

use crate::error::BackendError;
use crate::model::CandidateRecord;
use crate::pipeline::CancelToken;

/// Longest stretch a pending backend call goes without a cancellation check.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// What part of a capture a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    FullCapture,
    IdentityZone { row: usize },
    NumericZone { row: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct RecognitionRequest<'a> {
    pub capture_id: &'a str,
    pub region: RegionKind,
    pub image: &'a RgbImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Text(String),
    Records(Vec<CandidateRecord>),
}

pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<Recognition, BackendError>;
}

/// Backends used for one run. Numeric zones go to the dedicated numeric
/// backend when one is set and to the primary otherwise; either way the
/// reading is reconciled with whatever the identity zone already showed.
#[derive(Clone)]
pub struct BackendSet {
    pub primary: Arc<dyn OcrBackend>,
    pub numeric: Option<Arc<dyn OcrBackend>>,
}

impl BackendSet {
    #[must_use]
    pub fn single(primary: Arc<dyn OcrBackend>) -> Self {
        Self {
            primary,
            numeric: None,
        }
    }

    #[must_use]
    pub fn with_numeric(mut self, numeric: Arc<dyn OcrBackend>) -> Self {
        self.numeric = Some(numeric);
        self
    }

    pub(crate) fn numeric_reader(&self) -> &Arc<dyn OcrBackend> {
        self.numeric.as_ref().unwrap_or(&self.primary)
    }
}

/// Runs one backend call on its own thread and waits at most `limit` for the
/// answer. A call still pending at the deadline, or when `cancel` trips, is
/// abandoned: the caller moves on and the late result is dropped.
pub(crate) fn timed_recognize(
    backend: &Arc<dyn OcrBackend>,
    request: &RecognitionRequest<'_>,
    limit: Duration,
    cancel: &CancelToken,
) -> Result<Recognition, BackendError> {
    let (sender, receiver) = mpsc::channel();
    let worker = Arc::clone(backend);
    let capture_id = request.capture_id.to_string();
    let region = request.region;
    let image = request.image.clone();
    thread::Builder::new()
        .name(format!("ocr-{}", backend.name()))
        .spawn(move || {
            let request = RecognitionRequest {
                capture_id: &capture_id,
                region,
                image: &image,
            };
            // Nobody is listening once the call was abandoned.
            let _ = sender.send(worker.recognize(&request));
        })
        .map_err(|error| BackendError::Failed(format!("failed to start backend call: {error}")))?;

    let started = Instant::now();
    loop {
        let remaining = limit.saturating_sub(started.elapsed());
        match receiver.recv_timeout(remaining.min(CANCEL_POLL)) {
            Ok(result) => {
                debug!(
                    backend = backend.name(),
                    capture = request.capture_id,
                    region = ?request.region,
                    elapsed_ms = started.elapsed().as_millis(),
                    "backend call finished"
                );
                return result;
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BackendError::Failed(format!(
                    "backend '{}' stopped without answering",
                    backend.name()
                )));
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        if started.elapsed() >= limit {
            return Err(BackendError::Timeout {
                backend: backend.name().to_string(),
                limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            });
        }
    }
}

/// Serves text recognized ahead of time by an external process, keyed by
/// capture id. Only whole captures can be answered.
#[derive(Debug, Clone, Default)]
pub struct PrerecognizedBackend {
    texts: HashMap<String, String>,
}

impl PrerecognizedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capture_id: impl Into<String>, text: impl Into<String>) {
        self.texts.insert(capture_id.into(), text.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

impl FromIterator<(String, String)> for PrerecognizedBackend {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            texts: iter.into_iter().collect(),
        }
    }
}

impl OcrBackend for PrerecognizedBackend {
    fn name(&self) -> &str {
        "prerecognized"
    }

    fn recognize(&self, request: &RecognitionRequest<'_>) -> Result<Recognition, BackendError> {
        if request.region != RegionKind::FullCapture {
            return Err(BackendError::UnsupportedRegion(self.name().to_string()));
        }
        self.texts
            .get(request.capture_id)
            .cloned()
            .map(Recognition::Text)
            .ok_or_else(|| {
                BackendError::Failed(format!("no text recorded for '{}'", request.capture_id))
            })
    }
}
