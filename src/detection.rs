//! Watermark localisation by edge density.
//!
//! AI image generators stamp their marks along the bottom edge. The locator
//! scores three fixed candidate regions proportional to the image size:
//! 1. **Scoring**: fraction of pixels whose Sobel gradient magnitude is strong
//! 2. **Narrowing**: inside a candidate that scores above threshold, each
//!    connected Canny edge chain is boxed and only text-shaped boxes are kept.
//!    Chains spanning most of the candidate are texture and are dropped
//!
//! In aggressive mode the bottom band is returned whole regardless of score.

use std::collections::BTreeMap;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::region::Region;

/// Minimum edge density for a candidate to be considered watermarked (tunable).
pub const EDGE_DENSITY_THRESHOLD: f32 = 0.005;
/// Height of the aggressive bottom band as a fraction of image height (tunable).
pub const BOTTOM_BAND_RATIO: f32 = 0.12;
/// Sobel magnitude (on `[0, 1]` luminance) above which a pixel counts as an edge.
const EDGE_MAGNITUDE: f32 = 0.25;
/// Candidates narrower than this are skipped.
const MIN_CANDIDATE_WIDTH: u32 = 16;
/// Candidates shorter than this are skipped.
const MIN_CANDIDATE_HEIGHT: u32 = 8;
/// Dilation radius that closes single-pixel gaps in a glyph outline.
const OUTLINE_CLOSE: u8 = 1;
/// Canny hysteresis thresholds.
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// Text-shaped component: wider than this...
const TEXT_MIN_WIDTH: u32 = 20;
/// ...taller than this...
const TEXT_MIN_HEIGHT: u32 = 5;
/// ...and at least this many times wider than tall.
const TEXT_MIN_ASPECT: u32 = 2;
/// Components spanning more than this share of the candidate's height are
/// texture, not a stamped mark.
const TEXT_MAX_HEIGHT_SHARE: f32 = 0.5;
/// Same for width. Marks fill their corner more horizontally than vertically.
const TEXT_MAX_WIDTH_SHARE: f32 = 0.9;
/// Extra margin added around each text box before inpainting.
const TEXT_BOX_PADDING: u32 = 5;

/// Where a candidate region sits in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Left 30%, bottom 15%.
    BottomLeft,
    /// Right 30%, bottom 15%.
    BottomRight,
    /// Middle 40%, bottom 10%.
    BottomCenter,
}

/// A scored candidate region.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Which fixed location this is.
    pub kind: CandidateKind,
    /// The candidate rectangle, clipped to the image.
    pub region: Region,
    /// Edge density in `[0, 1]`.
    pub score: f32,
}

impl Candidate {
    /// Whether the edge density crosses [`EDGE_DENSITY_THRESHOLD`].
    #[must_use]
    pub fn passes(&self) -> bool {
        self.score >= EDGE_DENSITY_THRESHOLD
    }
}

/// The fixed candidate rectangles for a `width` x `height` image.
///
/// Candidates smaller than the minimum scan size are left out.
#[must_use]
pub fn candidate_regions(width: u32, height: u32) -> Vec<(CandidateKind, Region)> {
    let layout = [
        (CandidateKind::BottomRight, (0.7, 0.85, 1.0, 1.0)),
        (CandidateKind::BottomLeft, (0.0, 0.85, 0.3, 1.0)),
        (CandidateKind::BottomCenter, (0.3, 0.9, 0.7, 1.0)),
    ];
    layout
        .into_iter()
        .filter_map(|(kind, (left, top, right, bottom))| {
            Region::from_fractions(width, height, left, top, right, bottom).map(|r| (kind, r))
        })
        .filter(|(_, r)| r.width >= MIN_CANDIDATE_WIDTH && r.height >= MIN_CANDIDATE_HEIGHT)
        .collect()
}

/// The full-width band removed unconditionally in aggressive mode.
#[must_use]
pub fn bottom_band(width: u32, height: u32) -> Option<Region> {
    Region::from_fractions(width, height, 0.0, 1.0 - BOTTOM_BAND_RATIO, 1.0, 1.0)
}

/// Score every candidate region of `image`, highest density first.
#[must_use]
pub fn score_candidates(image: &RgbaImage) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = candidate_regions(image.width(), image.height())
        .into_iter()
        .map(|(kind, region)| Candidate {
            kind,
            region,
            score: edge_density(image, &region),
        })
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// Locate likely watermark regions in `image`.
///
/// Returns text-shaped boxes found inside candidates that pass the edge
/// density threshold, ordered by their candidate's score. With `aggressive`
/// the whole bottom band is included as well. An empty result means there is
/// nothing to remove.
#[must_use]
pub fn locate(image: &RgbaImage, aggressive: bool) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();

    for candidate in score_candidates(image) {
        log::debug!(
            "candidate {:?} at {:?}: edge density {:.4}",
            candidate.kind,
            candidate.region,
            candidate.score
        );
        if !candidate.passes() {
            continue;
        }
        for region in text_boxes(image, &candidate.region) {
            if !regions.contains(&region) {
                regions.push(region);
            }
        }
    }

    if aggressive {
        if let Some(band) = bottom_band(image.width(), image.height()) {
            if !regions.contains(&band) {
                regions.push(band);
            }
        }
    }

    regions
}

/// Fraction of pixels in `region` with a strong Sobel gradient.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn edge_density(image: &RgbaImage, region: &Region) -> f32 {
    let (w, h) = (region.width as usize, region.height as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let gray = region_to_grayscale(image, region);
    let magnitude = sobel_magnitude(&gray, w, h);
    let strong = magnitude.iter().filter(|&&m| m > EDGE_MAGNITUDE).count();
    strong as f32 / (w * h) as f32
}

/// Text-shaped edge chains inside `region`, padded and in image coordinates.
fn text_boxes(image: &RgbaImage, region: &Region) -> Vec<Region> {
    let gray = GrayImage::from_fn(region.width, region.height, |dx, dy| {
        Luma([luminance(image.get_pixel(region.x + dx, region.y + dy))])
    });
    let edges = dilate(
        &canny(&gray, CANNY_LOW, CANNY_HIGH),
        Norm::LInf,
        OUTLINE_CLOSE,
    );
    let labels = connected_components(&edges, Connectivity::Eight, Luma([0u8]));

    // label -> (min_x, min_y, max_x, max_y)
    let mut bounds: BTreeMap<u32, (u32, u32, u32, u32)> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        bounds
            .entry(label)
            .and_modify(|b| {
                b.0 = b.0.min(x);
                b.1 = b.1.min(y);
                b.2 = b.2.max(x);
                b.3 = b.3.max(y);
            })
            .or_insert((x, y, x, y));
    }

    let mut boxes: Vec<Region> = bounds
        .into_values()
        .filter_map(|(x1, y1, x2, y2)| {
            let (w, h) = (x2 - x1 + 1, y2 - y1 + 1);
            is_text_shaped(w, h, region).then_some(Region {
                x: region.x + x1,
                y: region.y + y1,
                width: w,
                height: h,
            })
        })
        .map(|r| r.padded(TEXT_BOX_PADDING, image.width(), image.height()))
        .collect();
    boxes.sort_by_key(|r| (r.x, r.y));
    boxes
}

/// A `w` x `h` component is a plausible line of text inside `candidate`.
#[allow(clippy::cast_precision_loss)]
fn is_text_shaped(w: u32, h: u32, candidate: &Region) -> bool {
    let wide = w > TEXT_MIN_WIDTH && h > TEXT_MIN_HEIGHT && w > h * TEXT_MIN_ASPECT;
    let fits = (h as f32) <= candidate.height as f32 * TEXT_MAX_HEIGHT_SHARE
        && (w as f32) <= candidate.width as f32 * TEXT_MAX_WIDTH_SHARE;
    wide && fits
}

/// BT.601 luma of `px` on the `[0, 255]` scale.
fn luma(px: &Rgba<u8>) -> f32 {
    0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2])
}

// Result lies within [0, 255].
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn luminance(px: &Rgba<u8>) -> u8 {
    luma(px).round() as u8
}

/// Convert an image region to grayscale float values in `[0, 1]`.
fn region_to_grayscale(img: &RgbaImage, region: &Region) -> Vec<f32> {
    let mut gray = Vec::with_capacity(region.area() as usize);
    for dy in 0..region.height {
        for dx in 0..region.width {
            gray.push(luma(img.get_pixel(region.x + dx, region.y + dy)) / 255.0);
        }
    }
    gray
}

/// Compute Sobel gradient magnitude for a 2D float array.
///
/// Uses 3x3 Sobel kernels. Border pixels are set to 0.
fn sobel_magnitude(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut result = vec![0.0_f32; width * height];

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            // y >= 1 and x >= 1, dy/dx in {-1, 0, 1}, so indices are always valid.
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let idx = |dy: isize, dx: isize| -> f32 {
                data[((y as isize + dy) as usize) * width + (x as isize + dx) as usize]
            };

            let gx = -idx(-1, -1) + idx(-1, 1) - 2.0 * idx(0, -1) + 2.0 * idx(0, 1) - idx(1, -1)
                + idx(1, 1);

            let gy = -idx(-1, -1) - 2.0 * idx(-1, 0) - idx(-1, 1)
                + idx(1, -1)
                + 2.0 * idx(1, 0)
                + idx(1, 1);

            result[y * width + x] = (gx * gx + gy * gy).sqrt();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const PAPER: Rgba<u8> = Rgba([128, 128, 128, 255]);
    const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    /// 400x300 gray image with a dark caption strip near the bottom-right
    /// corner.
    fn stamped_image() -> RgbaImage {
        let mut img = RgbaImage::from_pixel(400, 300, PAPER);
        for y in 270..282 {
            for x in 300..380 {
                img.put_pixel(x, y, INK);
            }
        }
        img
    }

    /// 600x400 checkerboard of 4 px cells with a little deterministic noise.
    fn textured_image() -> RgbaImage {
        RgbaImage::from_fn(600, 400, |x, y| {
            let base: i32 = if (x / 4 + y / 4) % 2 == 0 { 40 } else { 200 };
            let hash = x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503);
            let noise = i32::try_from(hash % 21).unwrap() - 10;
            let v = u8::try_from(base + noise).unwrap();
            Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn sobel_returns_zero_for_flat_image() {
        let data = vec![0.5_f32; 10 * 10];
        let grad = sobel_magnitude(&data, 10, 10);
        for &g in &grad {
            assert!(g.abs() < 1e-6, "Flat image should have zero gradient");
        }
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        let mut data = vec![0.0_f32; 10 * 10];
        for y in 0..10 {
            for x in 5..10 {
                data[y * 10 + x] = 1.0;
            }
        }
        let grad = sobel_magnitude(&data, 10, 10);
        let center_grad = grad[5 * 10 + 5];
        assert!(
            center_grad > 0.1,
            "Edge should produce non-zero gradient, got {center_grad}"
        );
    }

    #[test]
    fn grayscale_matches_rounded_luminance() {
        let img = RgbaImage::from_pixel(2, 1, Rgba([200, 100, 50, 255]));
        let region = Region {
            x: 0,
            y: 0,
            width: 2,
            height: 1,
        };
        let gray = region_to_grayscale(&img, &region);
        let expected = f32::from(luminance(img.get_pixel(0, 0))) / 255.0;
        assert!((gray[0] - expected).abs() < 0.5 / 255.0);
    }

    #[test]
    fn candidates_follow_image_proportions() {
        let regions = candidate_regions(1000, 1000);
        assert_eq!(regions.len(), 3);
        let find = |kind| regions.iter().find(|(k, _)| *k == kind).map(|(_, r)| *r);

        let br = find(CandidateKind::BottomRight).unwrap();
        assert_eq!((br.x, br.y, br.right(), br.bottom()), (700, 850, 1000, 1000));
        let bl = find(CandidateKind::BottomLeft).unwrap();
        assert_eq!((bl.x, bl.y, bl.right(), bl.bottom()), (0, 850, 300, 1000));
        let bc = find(CandidateKind::BottomCenter).unwrap();
        assert_eq!((bc.x, bc.y, bc.right(), bc.bottom()), (300, 900, 700, 1000));
        let band = bottom_band(1000, 1000).unwrap();
        assert_eq!((band.x, band.y, band.width, band.height), (0, 880, 1000, 120));
    }

    #[test]
    fn tiny_images_skip_undersized_candidates() {
        assert!(candidate_regions(20, 20).is_empty());
        assert!(candidate_regions(50, 70).is_empty());
        assert!(bottom_band(50, 70).is_some());
    }

    #[test]
    fn black_region_scores_below_threshold() {
        let img = RgbaImage::from_pixel(300, 200, Rgba([0, 0, 0, 255]));
        for candidate in score_candidates(&img) {
            assert!(candidate.score < EDGE_DENSITY_THRESHOLD);
            assert!(!candidate.passes());
        }
        assert!(locate(&img, false).is_empty());
    }

    #[test]
    fn aggressive_always_includes_bottom_band() {
        let img = RgbaImage::from_pixel(300, 200, Rgba([0, 0, 0, 255]));
        let regions = locate(&img, true);
        let band = Region {
            x: 0,
            y: 176,
            width: 300,
            height: 24,
        };
        assert_eq!(regions, vec![band]);
    }

    #[test]
    fn stamped_text_scores_above_threshold() {
        let img = stamped_image();
        let best = &score_candidates(&img)[0];
        assert!(best.passes(), "score {}", best.score);
        assert_eq!(best.kind, CandidateKind::BottomRight);
    }

    #[test]
    fn locate_narrows_to_text_box() {
        let img = stamped_image();
        let regions = locate(&img, false);
        assert!(!regions.is_empty());
        let covering = regions
            .iter()
            .find(|r| r.contains(300, 270) && r.contains(379, 281))
            .expect("a box should cover the stamped strip");
        assert!(covering.area() < 120 * 45, "box should be tighter than the corner");
        for r in &regions {
            assert!(r.right() <= 400 && r.bottom() <= 300);
        }
    }

    #[test]
    fn textured_bottom_without_mark_yields_nothing() {
        let img = textured_image();
        assert!(
            score_candidates(&img).iter().any(Candidate::passes),
            "texture should still be edge dense"
        );
        assert!(locate(&img, false).is_empty());
    }

    #[test]
    fn component_spanning_candidate_is_not_text() {
        let candidate = Region {
            x: 0,
            y: 0,
            width: 180,
            height: 60,
        };
        assert!(is_text_shaped(80, 14, &candidate));
        assert!(!is_text_shaped(175, 20, &candidate));
        assert!(!is_text_shaped(120, 40, &candidate));
        assert!(!is_text_shaped(18, 6, &candidate));
    }
}
