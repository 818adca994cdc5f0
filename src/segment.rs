//! Splits one capture into horizontal bands using the divider lines drawn
//! between table rows.
//!
//! Divider detection compares each pixel row's mean luminance with rows a
//! height-proportional distance above and below it, so the same thresholds
//! hold at any capture resolution. Spans between dividers are then sorted
//! into member rows and (shorter) section headers.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use image::{RgbImage, imageops};

use crate::model::{RowKind, RowRegion};
use crate::options::{SegmenterOptions, ZoneSpan};

/// Minimum pixel distance used for neighbour sampling and clustering.
const MIN_PIXEL_DISTANCE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub kind: RowKind,
    pub start: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub regions: Vec<RowRegion>,
    pub dividers: Vec<u32>,
    /// No usable dividers; the whole capture came back as one partial region.
    pub fallback: bool,
}

impl Segmentation {
    /// Pixel heights of the member rows, for overlap analysis.
    #[must_use]
    pub fn member_heights(&self) -> Vec<u32> {
        self.regions
            .iter()
            .filter(|region| region.kind == RowKind::Member)
            .map(|region| region.height)
            .collect()
    }
}

fn scaled_distance(height: u32, fraction: f32) -> u32 {
    ((height as f32 * fraction).round() as u32).max(MIN_PIXEL_DISTANCE)
}

/// Mean luminance of every pixel row.
#[must_use]
pub fn row_luminance(image: &RgbImage) -> Vec<f32> {
    let gray = imageops::grayscale(image);
    let width = gray.width().max(1) as f32;
    gray.rows()
        .map(|row| row.map(|pixel| f32::from(pixel.0[0])).sum::<f32>() / width)
        .collect()
}

/// Centre rows of the divider lines found in a luminance profile.
#[must_use]
pub fn detect_dividers(luminance: &[f32], options: &SegmenterOptions) -> Vec<u32> {
    let height = luminance.len() as u32;
    let reach = scaled_distance(height, options.neighbor_fraction) as usize;
    let cluster_gap = scaled_distance(height, options.cluster_fraction);

    let candidates = (reach..luminance.len().saturating_sub(reach))
        .filter(|&y| {
            let here = luminance[y];
            (here - luminance[y - reach]).abs() > options.brightness_delta
                && (here - luminance[y + reach]).abs() > options.brightness_delta
        })
        .map(|y| y as u32)
        .collect::<Vec<_>>();

    let mut dividers = Vec::new();
    let mut cluster: Option<(u32, u32)> = None;
    for y in candidates {
        cluster = match cluster {
            Some((first, last)) if y - last <= cluster_gap => Some((first, y)),
            Some((first, last)) => {
                dividers.push((first + last) / 2);
                Some((y, y))
            }
            None => Some((y, y)),
        };
    }
    if let Some((first, last)) = cluster {
        dividers.push((first + last) / 2);
    }
    dividers
}

fn median(values: &[u32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f32 / 2.0
    } else {
        sorted[mid] as f32
    })
}

/// Boundary between header-sized and member-sized gaps, or `None` when all
/// gaps belong to a single size class.
fn header_boundary(gaps: &[u32], options: &SegmenterOptions) -> Option<f32> {
    let max = *gaps.iter().max()?;
    let min = *gaps.iter().min()?;
    if min == 0 || (max as f32 / min as f32) < options.single_class_ratio {
        return None;
    }

    let mut sorted = gaps.to_vec();
    sorted.sort_unstable();
    let (smaller_max, _) = sorted
        .windows(2)
        .map(|pair| (pair[0], pair[1] - pair[0]))
        .max_by_key(|(_, jump)| *jump)?;
    Some(smaller_max as f32 * options.boundary_factor)
}

/// Classifies the spans delimited by `dividers` in an image `height` tall.
#[must_use]
pub fn classify_spans(dividers: &[u32], height: u32, options: &SegmenterOptions) -> Vec<Span> {
    if dividers.len() < 2 {
        return vec![Span {
            kind: RowKind::Partial,
            start: 0,
            height,
        }];
    }

    let gaps = dividers
        .windows(2)
        .map(|pair| (pair[0], pair[1] - pair[0]))
        .collect::<Vec<_>>();
    let largest = gaps.iter().map(|(_, gap)| *gap).max().unwrap_or(0);
    let sliver = largest as f32 * options.sliver_fraction;
    let kept = gaps
        .into_iter()
        .filter(|(_, gap)| *gap as f32 >= sliver)
        .collect::<Vec<_>>();

    let kept_sizes = kept.iter().map(|(_, gap)| *gap).collect::<Vec<_>>();
    let boundary = header_boundary(&kept_sizes, options);
    let inner = kept
        .into_iter()
        .map(|(start, gap)| {
            let kind = match boundary {
                Some(boundary) if (gap as f32) < boundary => RowKind::Header,
                _ => RowKind::Member,
            };
            Span {
                kind,
                start,
                height: gap,
            }
        })
        .collect::<Vec<_>>();

    let header_heights = inner
        .iter()
        .filter(|span| span.kind == RowKind::Header)
        .map(|span| span.height)
        .collect::<Vec<_>>();

    let mut spans = Vec::with_capacity(inner.len() + 2);
    let lead = dividers[0];
    if lead > 0 {
        let recovered_header = median(&header_heights).is_some_and(|typical| {
            (lead as f32 - typical).abs() <= typical * options.leading_header_tolerance
        });
        spans.push(Span {
            kind: if recovered_header {
                RowKind::Header
            } else {
                RowKind::Partial
            },
            start: 0,
            height: lead,
        });
    }
    spans.extend(inner);
    let last = dividers[dividers.len() - 1];
    if last < height {
        spans.push(Span {
            kind: RowKind::Partial,
            start: last,
            height: height - last,
        });
    }
    spans
}

/// Segments one capture into classified row regions.
#[must_use]
pub fn segment_rows(image: &RgbImage, options: &SegmenterOptions) -> Segmentation {
    let dividers = detect_dividers(&row_luminance(image), options);
    let spans = classify_spans(&dividers, image.height(), options);
    let regions = spans
        .into_iter()
        .filter(|span| span.height > 0)
        .map(|span| RowRegion {
            kind: span.kind,
            vertical_start: span.start,
            height: span.height,
            pixels: imageops::crop_imm(image, 0, span.start, image.width(), span.height)
                .to_image(),
        })
        .collect();

    Segmentation {
        regions,
        fallback: dividers.len() < 2,
        dividers,
    }
}

/// Horizontal sub-crop of a row, e.g. the identity or numeric zone.
#[must_use]
pub fn crop_zone(row: &RowRegion, zone: ZoneSpan) -> RgbImage {
    let (x, width) = zone.columns(row.pixels.width());
    imageops::crop_imm(&row.pixels, x, 0, width, row.pixels.height()).to_image()
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{Span, classify_spans, crop_zone, detect_dividers, row_luminance, segment_rows};
    use crate::model::RowKind;
    use crate::options::{SegmenterOptions, ZoneSpan};

    fn ruled_image(width: u32, height: u32, lines: &[u32]) -> RgbImage {
        RgbImage::from_fn(width, height, |_, y| {
            if lines.iter().any(|&line| y == line || y == line + 1) {
                Rgb([30, 30, 30])
            } else {
                Rgb([230, 230, 230])
            }
        })
    }

    fn kinds(spans: &[Span]) -> Vec<(RowKind, u32)> {
        spans.iter().map(|span| (span.kind, span.height)).collect()
    }

    #[test]
    fn finds_thin_divider_lines() {
        let image = ruled_image(60, 240, &[40, 120, 200]);
        let dividers = detect_dividers(&row_luminance(&image), &SegmenterOptions::default());
        assert_eq!(dividers, vec![40, 120, 200]);
    }

    #[test]
    fn uniform_gaps_are_all_members() {
        let spans = classify_spans(&[40, 120, 200], 240, &SegmenterOptions::default());
        assert_eq!(
            kinds(&spans),
            vec![
                (RowKind::Partial, 40),
                (RowKind::Member, 80),
                (RowKind::Member, 80),
                (RowKind::Partial, 40),
            ]
        );
    }

    #[test]
    fn short_gaps_become_headers_and_slivers_drop() {
        // gaps: 40 header, 80, 80 members, 5 sliver, 80 member
        let dividers = [50, 90, 170, 250, 255, 335];
        let spans = classify_spans(&dividers, 400, &SegmenterOptions::default());
        assert_eq!(
            kinds(&spans),
            vec![
                (RowKind::Header, 50),
                (RowKind::Header, 40),
                (RowKind::Member, 80),
                (RowKind::Member, 80),
                (RowKind::Member, 80),
                (RowKind::Partial, 65),
            ]
        );
    }

    #[test]
    fn leading_span_stays_partial_without_comparable_header() {
        let dividers = [20, 60, 140, 220];
        let spans = classify_spans(&dividers, 240, &SegmenterOptions::default());
        assert_eq!(spans[0].kind, RowKind::Partial);
        assert_eq!(spans[1].kind, RowKind::Header);
    }

    #[test]
    fn too_few_dividers_fall_back_to_one_partial_region() {
        let image = ruled_image(50, 100, &[40]);
        let segmentation = segment_rows(&image, &SegmenterOptions::default());
        assert!(segmentation.fallback);
        assert_eq!(segmentation.regions.len(), 1);
        assert_eq!(segmentation.regions[0].kind, RowKind::Partial);
        assert_eq!(segmentation.regions[0].height, 100);
    }

    #[test]
    fn crops_identity_zone() {
        let image = ruled_image(200, 240, &[40, 120, 200]);
        let segmentation = segment_rows(&image, &SegmenterOptions::default());
        assert_eq!(segmentation.member_heights(), vec![80, 80]);
        let member = &segmentation.regions[1];
        let zone = crop_zone(member, ZoneSpan::new(13.0, 68.0));
        assert_eq!(zone.dimensions(), (110, 80));
    }
}
