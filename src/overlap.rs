//! Coverage feedback for the capture loop: which consecutive captures share
//! no rows at all, and how far to scroll so that they would.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::CandidateRecord;

/// Accepted band around the median row height, as fractions of it.
const ROW_HEIGHT_BAND: (f64, f64) = (0.5, 1.5);
/// Rows two consecutive captures should have in common.
const TARGET_OVERLAP_ROWS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageGap {
    pub before: String,
    pub after: String,
    /// Position of the first capture after the break.
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlapReport {
    pub gaps: Vec<CoverageGap>,
    /// Shared record keys for each consecutive capture pair.
    pub pair_overlaps: Vec<usize>,
    pub average_row_height: Option<f64>,
    pub recommended_scroll_distance: Option<u32>,
}

/// Mean of the heights within 50%-150% of their median.
#[must_use]
pub fn average_row_height(heights: &[u32]) -> Option<f64> {
    if heights.is_empty() {
        return None;
    }
    let mut sorted = heights.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        f64::from(sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        f64::from(sorted[mid])
    };

    let (low, high) = (median * ROW_HEIGHT_BAND.0, median * ROW_HEIGHT_BAND.1);
    let kept = sorted
        .iter()
        .map(|height| f64::from(*height))
        .filter(|height| (low..=high).contains(height))
        .collect::<Vec<_>>();
    if kept.is_empty() {
        return None;
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Scroll step leaving two rows of overlap, never less than one row.
#[must_use]
pub fn recommended_scroll_distance(region_height: u32, row_height: f64) -> u32 {
    let distance = (f64::from(region_height) - TARGET_OVERLAP_ROWS * row_height).max(row_height);
    distance.round() as u32
}

#[must_use]
pub fn analyze_overlap(
    records: &[CandidateRecord],
    capture_ids: &[String],
    region_height: u32,
    row_heights: &[u32],
) -> OverlapReport {
    let positions = capture_ids
        .iter()
        .enumerate()
        .map(|(position, id)| (id.as_str(), position))
        .collect::<HashMap<_, _>>();
    let mut keys = vec![HashSet::new(); capture_ids.len()];
    for record in records {
        let key = record.tracking_key();
        for source in &record.provenance {
            if let Some(&position) = positions.get(source.as_str()) {
                keys[position].insert(key.clone());
            }
        }
    }

    let pair_overlaps = keys
        .windows(2)
        .map(|pair| pair[0].intersection(&pair[1]).count())
        .collect::<Vec<_>>();

    // Consecutive broken pairs describe one missed stretch of the table.
    let mut gaps = Vec::new();
    let mut open: Option<usize> = None;
    for (pair, shared) in pair_overlaps.iter().enumerate() {
        let broken = *shared == 0 && !keys[pair].is_empty() && !keys[pair + 1].is_empty();
        match (broken, open) {
            (true, None) => open = Some(pair),
            (false, Some(start)) => {
                gaps.push(gap(capture_ids, start, pair));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        gaps.push(gap(capture_ids, start, pair_overlaps.len()));
    }

    let average = average_row_height(row_heights);
    OverlapReport {
        gaps,
        pair_overlaps,
        average_row_height: average,
        recommended_scroll_distance: average
            .map(|height| recommended_scroll_distance(region_height, height)),
    }
}

fn gap(capture_ids: &[String], start: usize, end: usize) -> CoverageGap {
    CoverageGap {
        before: capture_ids[start].clone(),
        after: capture_ids[end].clone(),
        index: start + 1,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{CoverageGap, analyze_overlap, average_row_height, recommended_scroll_distance};
    use crate::model::{CandidateRecord, Metrics};

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|n| format!("cap-{n:03}")).collect()
    }

    fn seen(identity: &str, captures: &[&str]) -> CandidateRecord {
        captures.iter().fold(
            CandidateRecord::new(identity, Metrics::new()),
            |record, capture| record.with_source(*capture),
        )
    }

    #[test]
    fn isolated_middle_capture_is_one_gap() {
        let records = [
            seen("Alpha", &["cap-000"]),
            seen("Bravo", &["cap-001"]),
            seen("Charlie", &["cap-002"]),
        ];
        let report = analyze_overlap(&records, &ids(3), 1000, &[]);
        assert_eq!(report.pair_overlaps, vec![0, 0]);
        assert_eq!(
            report.gaps,
            vec![CoverageGap {
                before: "cap-000".to_string(),
                after: "cap-002".to_string(),
                index: 1,
            }]
        );
    }

    #[test]
    fn shared_rows_and_empty_captures_are_not_gaps() {
        let records = [
            seen("Alpha", &["cap-000", "cap-001"]),
            seen("Bravo", &["cap-001"]),
        ];
        let report = analyze_overlap(&records, &ids(3), 1000, &[]);
        assert_eq!(report.pair_overlaps, vec![1, 0]);
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn one_capture_has_no_gaps() {
        let report = analyze_overlap(&[seen("Alpha", &["cap-000"])], &ids(1), 1000, &[80]);
        assert!(report.gaps.is_empty());
        assert!(report.pair_overlaps.is_empty());
    }

    #[test]
    fn row_height_ignores_partial_crops() {
        assert_eq!(average_row_height(&[80, 80, 82, 78, 20, 300]), Some(80.0));
        assert_eq!(average_row_height(&[]), None);
    }

    #[test]
    fn scroll_distance_keeps_two_rows_of_overlap() {
        assert_eq!(recommended_scroll_distance(1000, 80.0), 840);
        assert_eq!(recommended_scroll_distance(120, 80.0), 80);
        let report = analyze_overlap(&[], &ids(2), 1000, &[80, 80]);
        assert_eq!(report.recommended_scroll_distance, Some(840));
    }
}
