//! Turns recognized text into candidate records, anchored on positional
//! markers when the text has them and on group tags otherwise.

use crate::model::{CandidateRecord, Metrics};
use crate::name_extract::{extract_anchored, extract_segment};
use crate::numeric::extract_metrics;
use crate::options::ReconcileOptions;
use crate::token::{Token, TokenKind, group_tags, markers, numbers};

fn bounded(slice: &str, max_chars: usize) -> &str {
    slice
        .char_indices()
        .nth(max_chars)
        .map_or(slice, |(index, _)| &slice[..index])
}

fn line_start(text: &str, offset: usize) -> usize {
    text[..offset].rfind('\n').map_or(0, |index| index + 1)
}

/// Builds the metric set for one row in configured order; unread metrics are 0.
pub(crate) fn metrics_from_window(window: &str, options: &ReconcileOptions) -> Metrics {
    let readings = extract_metrics(window, options.metric_names.len(), options.min_metric);
    let mut metrics = Metrics::new();
    for (position, name) in options.metric_names.iter().enumerate() {
        metrics.set(name.clone(), readings.get(position).map_or(0, |number| number.value));
    }
    metrics
}

fn from_markers(
    text: &str,
    found: &[Token],
    capture_id: &str,
    options: &ReconcileOptions,
) -> Vec<CandidateRecord> {
    let mut records = Vec::new();
    for (position, marker) in found.iter().enumerate() {
        let TokenKind::Marker(key) = &marker.kind else {
            continue;
        };
        let Some(identity) = extract_anchored(text, marker.span.start) else {
            continue;
        };

        let window_end = found.get(position + 1).map_or(text.len(), |next| {
            let start = line_start(text, next.span.start);
            if start > marker.span.end {
                start
            } else {
                next.span.start
            }
        });
        let window = bounded(&text[marker.span.end..window_end], options.metric_window);

        records.push(
            CandidateRecord::new(identity, metrics_from_window(window, options))
                .with_key(*key)
                .with_source(capture_id),
        );
    }
    records
}

fn from_group_tags(
    text: &str,
    found: &[Token],
    capture_id: &str,
    options: &ReconcileOptions,
) -> Vec<CandidateRecord> {
    let mut records = Vec::new();
    for (position, tag) in found.iter().enumerate() {
        let TokenKind::GroupTag(group) = &tag.kind else {
            continue;
        };
        let end = found.get(position + 1).map_or(text.len(), |next| next.span.start);
        if let Some(record) = segment_record(&text[tag.span.end..end], capture_id, options) {
            records.push(record.with_group(group.clone()));
        }
    }
    records
}

/// Name up to the first number, metrics from the whole bounded segment.
fn segment_record(
    segment: &str,
    capture_id: &str,
    options: &ReconcileOptions,
) -> Option<CandidateRecord> {
    let name_end = numbers(segment)
        .first()
        .map_or(segment.len(), |number| number.span.start);
    let identity = extract_segment(&segment[..name_end])?;
    let window = bounded(segment, options.metric_window);
    Some(CandidateRecord::new(identity, metrics_from_window(window, options)).with_source(capture_id))
}

/// Candidate records found in the text recognized for one capture or crop.
#[must_use]
pub fn candidates_from_text(
    text: &str,
    capture_id: &str,
    options: &ReconcileOptions,
) -> Vec<CandidateRecord> {
    let found = markers(text);
    if !found.is_empty() {
        return from_markers(text, &found, capture_id, options);
    }
    let tags = group_tags(text);
    from_group_tags(text, &tags, capture_id, options)
}

/// Records read from one row crop. Anchored text parses as usual; a row with
/// no marker or tag still yields its leading name and metrics, unkeyed.
#[must_use]
pub fn candidates_from_row(
    text: &str,
    capture_id: &str,
    options: &ReconcileOptions,
) -> Vec<CandidateRecord> {
    let records = candidates_from_text(text, capture_id, options);
    if !records.is_empty() {
        return records;
    }
    segment_record(text, capture_id, options).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::{candidates_from_row, candidates_from_text};
    use crate::model::PositionalKey;
    use crate::options::ReconcileOptions;

    #[test]
    fn reads_one_record_per_marker() {
        let text = "x2 Hatsch (K:12 X:100 Y:200)\nLv 23 1,922,130\nAB DragonSlayer K:12 X:101 Y:220 954,000";
        let records = candidates_from_text(text, "cap-001", &ReconcileOptions::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity, "Hatsch");
        assert_eq!(records[0].metrics.get("score"), 1_922_130);
        assert_eq!(
            records[0].positional_key,
            Some(PositionalKey {
                zone: 12,
                x: 100,
                y: 200
            })
        );
        assert_eq!(records[1].identity, "DragonSlayer");
        assert_eq!(records[1].metrics.get("score"), 954_000);
        assert!(records[1].provenance.contains("cap-001"));
    }

    #[test]
    fn falls_back_to_group_tags() {
        let text = "[ABC] ox Hatsch 23\n1,200,000\n[ABC] Nobs II 41 880,500";
        let records = candidates_from_text(text, "cap-002", &ReconcileOptions::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity, "Hatsch");
        assert_eq!(records[0].group.as_deref(), Some("ABC"));
        assert_eq!(records[0].metrics.get("score"), 1_200_000);
        assert_eq!(records[1].identity, "Nobs II");
        assert_eq!(records[1].metrics.get("score"), 880_500);
    }

    #[test]
    fn missing_metric_reads_as_zero() {
        let text = "Hatsch K:1 X:2 Y:3 Lv 12";
        let records = candidates_from_text(text, "cap-003", &ReconcileOptions::default());
        assert_eq!(records[0].metrics.get("score"), 0);
    }

    #[test]
    fn text_without_anchors_yields_nothing() {
        let records = candidates_from_text("Members 40/50", "cap-004", &ReconcileOptions::default());
        assert!(records.is_empty());
    }

    #[test]
    fn bare_row_crop_reads_name_and_metric() {
        let records = candidates_from_row("Hatsch 23\n1,922,130", "cap-005", &ReconcileOptions::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "Hatsch");
        assert_eq!(records[0].positional_key, None);
        assert_eq!(records[0].metrics.get("score"), 1_922_130);
    }
}
