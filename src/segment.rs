//! Color-keyed background segmentation with soft fringe cleanup.
//!
//! A pixel is background when it is already fully transparent or lies within
//! the target color's tolerance. Foreground pixels within [`FRINGE_RADIUS`] of
//! the background receive partial removal proportional to how close they are
//! to the background color, and their color is un-blended from it, so
//! anti-aliased edges do not keep a halo of background tint.

use image::{GrayImage, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use rayon::prelude::*;

use crate::color::Color;
use crate::region::{Mask, MASK_CLEAR, MASK_SET};

/// Width in pixels of the soft band around the background boundary.
pub const FRINGE_RADIUS: u8 = 2;
/// Distance beyond the tolerance over which a fringe pixel ramps to fully opaque.
const FRINGE_RAMP: f32 = 96.0;

/// Compute the background mask of `image` for `color`.
///
/// Fully transparent pixels always count as background, so segmenting an
/// already processed image again removes nothing new.
#[must_use]
pub fn segment(image: &RgbaImage, color: &Color) -> Mask {
    let (width, height) = image.dimensions();
    let mut background = binary_background(image, color);
    drop_isolated_specks(&mut background, image);

    let near_background = dilate(&background, Norm::LInf, FRINGE_RADIUS);

    let mut mask = Mask::from_gray(background.clone());
    for y in 0..height {
        for x in 0..width {
            if background.get_pixel(x, y)[0] == MASK_SET
                || near_background.get_pixel(x, y)[0] == MASK_CLEAR
            {
                continue;
            }
            let px = image.get_pixel(x, y);
            let keep = fringe_opacity(color, [px[0], px[1], px[2]]);
            mask.set(x, y, removal_from_opacity(keep));
        }
    }
    mask
}

/// Segment `image` against `color`, clean up the fringe and apply the result
/// as alpha in place. Returns the mask that was applied.
pub fn remove_color_background(image: &mut RgbaImage, color: &Color) -> Mask {
    let mask = segment(image, color);
    unblend_fringe(image, &mask, color);
    mask.apply_as_alpha(image);
    mask
}

/// Raw per-pixel match: `255` for background, `0` for foreground.
fn binary_background(image: &RgbaImage, color: &Color) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut background = GrayImage::new(width, height);
    let cells: &mut [u8] = &mut background;
    cells
        .par_iter_mut()
        .zip(image.as_raw().par_chunks_exact(4))
        .for_each(|(cell, px)| {
            if px[3] == 0 || color.matches([px[0], px[1], px[2]]) {
                *cell = MASK_SET;
            }
        });
    background
}

/// Single matching pixels with no matching 8-neighbour are foreground detail
/// (highlights, specks) rather than background.
fn drop_isolated_specks(background: &mut GrayImage, image: &RgbaImage) {
    let (width, height) = background.dimensions();
    let mut specks = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if background.get_pixel(x, y)[0] == MASK_CLEAR || image.get_pixel(x, y)[3] == 0 {
                continue;
            }
            let (total, matching) =
                neighbours(x, y, width, height).fold((0, 0), |(t, m), (nx, ny)| {
                    let hit = background.get_pixel(nx, ny)[0] == MASK_SET;
                    (t + 1, m + usize::from(hit))
                });
            if total > 0 && matching == 0 {
                specks.push((x, y));
            }
        }
    }
    for (x, y) in specks {
        background.put_pixel(x, y, image::Luma([MASK_CLEAR]));
    }
}

fn neighbours(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let xs = x.saturating_sub(1)..=(x + 1).min(width - 1);
    xs.flat_map(move |nx| {
        let ys = y.saturating_sub(1)..=(y + 1).min(height - 1);
        ys.map(move |ny| (nx, ny))
    })
    .filter(move |&(nx, ny)| (nx, ny) != (x, y))
}

/// Opacity in `[0, 1]` kept by a fringe pixel of color `px`.
fn fringe_opacity(color: &Color, px: [u8; 3]) -> f32 {
    let beyond = f32::from(color.distance(px)) - f32::from(color.tolerance);
    (beyond / FRINGE_RAMP).clamp(0.0, 1.0)
}

// `keep` is clamped to [0, 1], so the result fits in u8.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn removal_from_opacity(keep: f32) -> u8 {
    ((1.0 - keep) * 255.0).round() as u8
}

/// Recover the foreground color of partially removed, still-opaque pixels:
/// `observed = a * fg + (1 - a) * bg`, solved for `fg`.
fn unblend_fringe(image: &mut RgbaImage, mask: &Mask, color: &Color) {
    let (width, height) = image.dimensions();
    for y in 0..height {
        for x in 0..width {
            let removal = mask.get(x, y);
            if removal == MASK_CLEAR || removal == MASK_SET {
                continue;
            }
            let px = image.get_pixel_mut(x, y);
            if px[3] < u8::MAX {
                continue;
            }
            let keep = f32::from(MASK_SET - removal) / 255.0;
            for ch in 0..3 {
                let bg = f32::from(color.rgb[ch]);
                let observed = f32::from(px[ch]);
                let fg = bg + (observed - bg) / keep;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = fg.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::NamedColor;
    use image::Rgba;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const INK: Rgba<u8> = Rgba([20, 20, 20, 255]);
    const EDGE: Rgba<u8> = Rgba([140, 140, 140, 255]);

    /// White canvas with a dark square whose outline is anti-aliased gray.
    fn ink_square() -> RgbaImage {
        RgbaImage::from_fn(40, 40, |x, y| {
            let inside = (10..30).contains(&x) && (10..30).contains(&y);
            let outline = (9..31).contains(&x) && (9..31).contains(&y);
            if inside {
                INK
            } else if outline {
                EDGE
            } else {
                WHITE
            }
        })
    }

    #[test]
    fn single_color_image_is_entirely_background() {
        let img = RgbaImage::from_pixel(32, 24, WHITE);
        let mask = segment(&img, &NamedColor::White.color());
        assert!((mask.coverage() - 1.0).abs() < f32::EPSILON);
        for y in 0..24 {
            for x in 0..32 {
                assert_eq!(mask.get(x, y), MASK_SET);
            }
        }
    }

    #[test]
    fn whole_image_removal_is_fully_transparent() {
        let mut img = RgbaImage::from_pixel(8, 8, Rgba([0, 250, 5, 255]));
        remove_color_background(&mut img, &NamedColor::Green.color());
        assert!(img.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn fringe_pixels_get_partial_removal() {
        let img = ink_square();
        let mask = segment(&img, &NamedColor::White.color());

        assert_eq!(mask.get(0, 0), MASK_SET);
        let edge = mask.get(9, 20);
        assert!(edge > MASK_CLEAR && edge < MASK_SET, "edge removal {edge}");
        // Deep inside the square, beyond the fringe band.
        assert_eq!(mask.get(20, 20), MASK_CLEAR);
    }

    #[test]
    fn fringe_color_is_unblended_from_background() {
        let mut img = ink_square();
        remove_color_background(&mut img, &NamedColor::White.color());
        let edge = img.get_pixel(9, 20);
        assert!(edge[0] < 140, "edge should darken once white is removed");
        assert!(edge[3] < 255 && edge[3] > 0);
        assert_eq!(*img.get_pixel(20, 20), INK);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn isolated_matching_pixel_inside_foreground_is_kept() {
        let mut img = RgbaImage::from_pixel(20, 20, WHITE);
        for y in 5..15 {
            for x in 5..15 {
                img.put_pixel(x, y, INK);
            }
        }
        img.put_pixel(10, 10, WHITE);
        let mask = segment(&img, &NamedColor::White.color());
        assert_eq!(mask.get(10, 10), MASK_CLEAR);
    }

    #[test]
    fn removal_is_idempotent() {
        let color = NamedColor::White.color();
        let mut once = ink_square();
        remove_color_background(&mut once, &color);
        let mut twice = once.clone();
        remove_color_background(&mut twice, &color);
        assert_eq!(once, twice, "second pass must not erase more foreground");
    }
}
