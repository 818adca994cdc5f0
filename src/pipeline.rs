//! One reconciliation run: segment and recognize every capture, correct and
//! accumulate the candidates in capture order, then deduplicate and report
//! coverage.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::accumulate::{Accumulator, AddOutcome};
use crate::backend::{BackendSet, Recognition, RecognitionRequest, RegionKind, timed_recognize};
use crate::correct::correct_name;
use crate::dedup::{PassOutcome, RemovedRecord, deduplicate};
use crate::error::{BackendError, ReconcileError};
use crate::model::{CandidateRecord, Capture, Metrics, RowKind, RowRegion};
use crate::name_extract::MIN_IDENTITY_LEN;
use crate::numeric::resolve_conflict;
use crate::options::{ReconcileOptions, RecognitionMode};
use crate::overlap::{OverlapReport, analyze_overlap};
use crate::parse::{candidates_from_row, candidates_from_text, metrics_from_window};
use crate::registry::KnownIdentityRegistry;
use crate::segment::{crop_zone, segment_rows};
use crate::warning::{RunWarning, WarningCode};

/// Shared abort flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// 1-based count of captures folded so far.
    pub current_index: usize,
    pub total: usize,
    pub capture_id: String,
}

pub type ProgressFn<'a> = dyn Fn(&ProgressEvent) + Sync + 'a;

#[derive(Default)]
pub struct RunHooks<'a> {
    pub cancel: CancelToken,
    pub progress: Option<&'a ProgressFn<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub records: Vec<CandidateRecord>,
    pub removed: Vec<RemovedRecord>,
    pub overlap: OverlapReport,
    pub warnings: Vec<RunWarning>,
    pub captures_total: usize,
    pub captures_processed: usize,
    pub cancelled: bool,
    pub row_heights: Vec<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything one capture contributed, before it is folded into the run.
#[derive(Debug)]
struct CaptureOutcome {
    capture_id: String,
    region_height: u32,
    candidates: Vec<CandidateRecord>,
    row_heights: Vec<u32>,
    warnings: Vec<RunWarning>,
}

/// Turns a failed backend call into a per-capture warning. Calls abandoned on
/// cancellation are covered by the run-level warning instead.
fn note_failure(warnings: &mut Vec<RunWarning>, error: &BackendError, capture_id: &str) {
    let code = match error {
        BackendError::Cancelled => return,
        BackendError::Timeout { .. } => WarningCode::BackendTimeout,
        _ => WarningCode::BackendFailure,
    };
    warn!(capture = capture_id, %error, "backend reading skipped");
    warnings.push(RunWarning::new(code, error.to_string()).with_capture(capture_id));
}

/// Finished records from a model-based backend, minus any whose identity is
/// too short to name anyone.
fn accept_records(
    records: Vec<CandidateRecord>,
    capture_id: &str,
    warnings: &mut Vec<RunWarning>,
) -> Vec<CandidateRecord> {
    let mut accepted = Vec::with_capacity(records.len());
    for mut record in records {
        let identity = record.identity.trim();
        if identity.chars().count() < MIN_IDENTITY_LEN {
            let error = BackendError::Malformed(format!(
                "record identity '{identity}' is shorter than {MIN_IDENTITY_LEN} characters"
            ));
            note_failure(warnings, &error, capture_id);
            continue;
        }
        record.identity = identity.to_string();
        accepted.push(record.with_source(capture_id));
    }
    accepted
}

fn into_candidates(
    recognition: Recognition,
    capture_id: &str,
    options: &ReconcileOptions,
    row_crop: bool,
    warnings: &mut Vec<RunWarning>,
) -> Vec<CandidateRecord> {
    match recognition {
        Recognition::Text(text) if row_crop => candidates_from_row(&text, capture_id, options),
        Recognition::Text(text) => candidates_from_text(&text, capture_id, options),
        Recognition::Records(records) => accept_records(records, capture_id, warnings),
    }
}

/// Folds an independent numeric-zone reading into the one already held.
fn reconcile_metrics(held: &mut Metrics, reading: &Metrics) {
    for (name, value) in reading.iter() {
        let current = held.get(name);
        let resolution = resolve_conflict(current, value);
        if resolution.value != current {
            debug!(
                metric = name,
                held = current,
                reading = value,
                kept = resolution.value,
                rule = ?resolution.rule,
                "numeric readings reconciled"
            );
        }
        held.set(name, resolution.value);
    }
}

fn apply_correction(candidate: &mut CandidateRecord, registry: &KnownIdentityRegistry) {
    if candidate.overrides.identity {
        return;
    }
    let corrected = correct_name(&candidate.identity, registry);
    if corrected.changed() && corrected.name != candidate.identity {
        debug!(
            raw = %candidate.identity,
            corrected = %corrected.name,
            source = ?corrected.source,
            "identity corrected"
        );
        candidate.identity = corrected.name;
    }
}

struct CaptureContext<'a> {
    backends: &'a BackendSet,
    registry: &'a KnownIdentityRegistry,
    options: &'a ReconcileOptions,
    cancel: &'a CancelToken,
}

impl CaptureContext<'_> {
    fn recognize_row(
        &self,
        capture: &Capture,
        row: usize,
        region: &RowRegion,
        warnings: &mut Vec<RunWarning>,
    ) -> Vec<CandidateRecord> {
        let limit = self.options.backend_timeout();
        let identity_crop = crop_zone(region, self.options.zones.identity);
        let request = RecognitionRequest {
            capture_id: &capture.id,
            region: RegionKind::IdentityZone { row },
            image: &identity_crop,
        };
        let mut candidates =
            match timed_recognize(&self.backends.primary, &request, limit, self.cancel) {
                Ok(recognition) => {
                    into_candidates(recognition, &capture.id, self.options, true, warnings)
                }
                Err(error) => {
                    note_failure(warnings, &error, &capture.id);
                    return Vec::new();
                }
            };
        if candidates.is_empty() {
            return candidates;
        }

        let numeric_crop = crop_zone(region, self.options.zones.numeric);
        let request = RecognitionRequest {
            capture_id: &capture.id,
            region: RegionKind::NumericZone { row },
            image: &numeric_crop,
        };
        let reading = match timed_recognize(
            self.backends.numeric_reader(),
            &request,
            limit,
            self.cancel,
        ) {
            Ok(Recognition::Text(text)) => metrics_from_window(&text, self.options),
            Ok(Recognition::Records(records)) => records
                .into_iter()
                .next()
                .map(|record| record.metrics)
                .unwrap_or_default(),
            Err(error) => {
                note_failure(warnings, &error, &capture.id);
                return candidates;
            }
        };
        for candidate in candidates
            .iter_mut()
            .filter(|candidate| !candidate.overrides.metrics)
        {
            reconcile_metrics(&mut candidate.metrics, &reading);
        }
        candidates
    }

    fn process(&self, capture: &Capture) -> CaptureOutcome {
        let segmentation = segment_rows(&capture.image, &self.options.segmenter);
        let mut outcome = CaptureOutcome {
            capture_id: capture.id.clone(),
            region_height: capture.image.height(),
            candidates: Vec::new(),
            row_heights: segmentation.member_heights(),
            warnings: Vec::new(),
        };
        if segmentation.fallback {
            outcome.warnings.push(
                RunWarning::new(
                    WarningCode::SegmentationFallback,
                    "no row dividers detected, capture treated as one partial region",
                )
                .with_capture(&capture.id),
            );
        }

        let members = segmentation
            .regions
            .iter()
            .filter(|region| region.kind == RowKind::Member)
            .collect::<Vec<_>>();
        debug!(
            capture = %capture.id,
            regions = segmentation.regions.len(),
            members = members.len(),
            "capture segmented"
        );

        if self.options.recognition == RecognitionMode::FullCapture || members.is_empty() {
            let request = RecognitionRequest {
                capture_id: &capture.id,
                region: RegionKind::FullCapture,
                image: &capture.image,
            };
            match timed_recognize(
                &self.backends.primary,
                &request,
                self.options.backend_timeout(),
                self.cancel,
            ) {
                Ok(recognition) => {
                    outcome.candidates = into_candidates(
                        recognition,
                        &capture.id,
                        self.options,
                        false,
                        &mut outcome.warnings,
                    );
                }
                Err(error) => note_failure(&mut outcome.warnings, &error, &capture.id),
            }
        } else {
            for (row, region) in members.into_iter().enumerate() {
                if self.cancel.is_cancelled() {
                    break;
                }
                let found = self.recognize_row(capture, row, region, &mut outcome.warnings);
                outcome.candidates.extend(found);
            }
        }

        if outcome.candidates.is_empty()
            && outcome.warnings.is_empty()
            && !self.cancel.is_cancelled()
        {
            outcome.warnings.push(
                RunWarning::new(WarningCode::EmptyCapture, "no records recognized")
                    .with_capture(&capture.id),
            );
        }
        for candidate in &mut outcome.candidates {
            apply_correction(candidate, self.registry);
        }
        outcome
    }

    /// Processes captures on a rayon pool and hands each outcome to `fold` on
    /// the calling thread as soon as every earlier capture has been folded.
    /// Captures skipped after cancellation end the foldable prefix.
    fn process_parallel<F>(&self, captures: &[Capture], mut fold: F) -> Result<(), ReconcileError>
    where
        F: FnMut(CaptureOutcome),
    {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = self.options.max_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        let (sender, receiver) = mpsc::channel::<(usize, CaptureOutcome)>();

        thread::scope(|scope| {
            scope.spawn(move || {
                pool.install(|| {
                    captures.par_iter().enumerate().for_each_with(
                        sender,
                        |sender, (index, capture)| {
                            if self.cancel.is_cancelled() {
                                return;
                            }
                            // The receiver only goes away if the caller panicked.
                            let _ = sender.send((index, self.process(capture)));
                        },
                    );
                });
            });

            let mut pending = BTreeMap::new();
            let mut next = 0;
            for (index, outcome) in receiver {
                pending.insert(index, outcome);
                while let Some(outcome) = pending.remove(&next) {
                    fold(outcome);
                    next += 1;
                }
            }
            if !pending.is_empty() {
                debug!(
                    dropped = pending.len(),
                    "outcomes after a skipped capture discarded"
                );
            }
        });
        Ok(())
    }
}

struct RunState {
    accumulator: Accumulator,
    warnings: Vec<RunWarning>,
    row_heights: Vec<u32>,
    capture_ids: Vec<String>,
    region_height: u32,
    total: usize,
}

impl RunState {
    fn new(total: usize) -> Self {
        Self {
            accumulator: Accumulator::new(),
            warnings: Vec::new(),
            row_heights: Vec::new(),
            capture_ids: Vec::with_capacity(total),
            region_height: 0,
            total,
        }
    }

    fn fold(&mut self, outcome: CaptureOutcome, hooks: &RunHooks<'_>) {
        for candidate in outcome.candidates {
            let identity = candidate.identity.clone();
            if let AddOutcome::Collision {
                key,
                base_key,
                existing_identity,
            } = self.accumulator.add(candidate)
            {
                self.warnings.push(
                    RunWarning::new(
                        WarningCode::PositionalCollision,
                        format!(
                            "'{identity}' and '{existing_identity}' share position {base_key}, kept apart as {key}"
                        ),
                    )
                    .with_capture(&outcome.capture_id)
                    .with_key(base_key)
                    .with_identity(identity),
                );
            }
        }
        self.warnings.extend(outcome.warnings);
        self.row_heights.extend(outcome.row_heights);
        self.region_height = self.region_height.max(outcome.region_height);
        self.capture_ids.push(outcome.capture_id);

        if let Some(progress) = hooks.progress {
            progress(&ProgressEvent {
                current_index: self.capture_ids.len(),
                total: self.total,
                capture_id: self.capture_ids.last().cloned().unwrap_or_default(),
            });
        }
    }
}

/// Reconciles an ordered capture sequence into one canonical record list.
///
/// Only run-level preconditions fail the call. Recognition failures, missing
/// dividers and positional collisions surface as warnings in the report, and
/// a cancelled run returns whatever was folded before the abort.
pub fn reconcile_captures(
    captures: &[Capture],
    backends: &BackendSet,
    registry: &KnownIdentityRegistry,
    options: &ReconcileOptions,
    hooks: &RunHooks<'_>,
) -> Result<RunReport, ReconcileError> {
    options.validate()?;
    if captures.is_empty() {
        return Err(ReconcileError::NoCaptures);
    }

    let started_at = Utc::now();
    info!(
        captures = captures.len(),
        mode = ?options.recognition,
        parallel = options.parallel,
        "reconciliation run started"
    );

    let context = CaptureContext {
        backends,
        registry,
        options,
        cancel: &hooks.cancel,
    };
    let mut state = RunState::new(captures.len());
    if options.parallel {
        context.process_parallel(captures, |outcome| state.fold(outcome, hooks))?;
    } else {
        for capture in captures {
            if hooks.cancel.is_cancelled() {
                break;
            }
            let outcome = context.process(capture);
            state.fold(outcome, hooks);
        }
    }

    let cancelled = hooks.cancel.is_cancelled();
    let processed = state.capture_ids.len();
    if cancelled {
        state.warnings.push(RunWarning::new(
            WarningCode::Cancelled,
            format!("run cancelled after {processed} of {} captures", captures.len()),
        ));
    }

    let accumulated = state.accumulator.into_records();
    let PassOutcome { records, removed } = deduplicate(&accumulated, options.suffix_policy);
    let overlap = analyze_overlap(
        &records,
        &state.capture_ids,
        state.region_height,
        &state.row_heights,
    );
    info!(
        processed,
        accumulated = accumulated.len(),
        records = records.len(),
        removed = removed.len(),
        gaps = overlap.gaps.len(),
        warnings = state.warnings.len(),
        "reconciliation run finished"
    );

    Ok(RunReport {
        records,
        removed,
        overlap,
        warnings: state.warnings,
        captures_total: captures.len(),
        captures_processed: processed,
        cancelled,
        row_heights: state.row_heights,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Re-applies name correction to an existing record list, usually after the
/// registry was reloaded following curation, and sweeps it for duplicates the
/// new corrections exposed. Pinned identities are left alone.
#[must_use]
pub fn revalidate_records(
    records: &[CandidateRecord],
    registry: &KnownIdentityRegistry,
    options: &ReconcileOptions,
) -> PassOutcome {
    let mut corrected = records.to_vec();
    for record in &mut corrected {
        apply_correction(record, registry);
    }
    deduplicate(&corrected, options.suffix_policy)
}
