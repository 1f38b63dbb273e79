//! Fast-marching inpainting (Telea 2004).
//!
//! Masked pixels are filled in order of their distance from the mask boundary.
//! Each one becomes a weighted average of already-known pixels within
//! [`INPAINT_RADIUS`], weighted by proximity and by alignment with the
//! marching direction. Pixels outside the mask are never written.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use image::RgbaImage;

use crate::region::{Mask, Region};

/// Neighbourhood radius sampled for every filled pixel.
pub const INPAINT_RADIUS: i64 = 3;
/// Margin around the mask that holds every pixel a fill may sample.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const WORK_MARGIN: u32 = INPAINT_RADIUS as u32 + 1;
/// Arrival time assigned to pixels the front has not reached yet.
const UNREACHED: f32 = 1.0e6;
/// Directional weights below this are treated as (almost) orthogonal.
const MIN_DIRECTION: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Known,
    Band,
    Inside,
}

/// Min-heap entry ordered by arrival time, then by pixel index.
#[derive(Debug, Clone, Copy)]
struct Front {
    time: f32,
    index: usize,
}

impl PartialEq for Front {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Front {}

impl PartialOrd for Front {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Front {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Remove the content of `regions` from `image` by inpainting.
///
/// Returns a new image; pixels outside the combined mask are byte-identical to
/// the input. An empty region list returns an unchanged copy.
#[must_use]
pub fn remove(image: &RgbaImage, regions: &[Region]) -> RgbaImage {
    let mut result = image.clone();
    remove_in_place(&mut result, regions);
    result
}

/// In-place variant of [`remove`].
pub fn remove_in_place(image: &mut RgbaImage, regions: &[Region]) {
    if regions.is_empty() {
        return;
    }
    let mask = Mask::from_regions(image.width(), image.height(), regions);
    inpaint(image, &mask);
}

/// Fill every pixel set in `mask` from its unmasked surroundings.
///
/// Work is confined to the mask's bounding box grown by the sampling radius,
/// so cost follows the size of the mask rather than the image. If the mask
/// covers the whole image there is nothing to sample from and the image is
/// left as is.
pub fn inpaint(image: &mut RgbaImage, mask: &Mask) {
    debug_assert_eq!(image.dimensions(), mask.dimensions());
    let Some(area) = work_area(mask) else {
        return;
    };
    let (ox, oy) = (area.x, area.y);
    let (w, h) = (i64::from(area.width), i64::from(area.height));
    let len = (area.width as usize) * (area.height as usize);

    let mut pixels: Vec<[f32; 4]> = Vec::with_capacity(len);
    let mut state = Vec::with_capacity(len);
    let mut time = Vec::with_capacity(len);
    for y in oy..area.bottom() {
        for x in ox..area.right() {
            let p = image.get_pixel(x, y);
            pixels.push([p[0], p[1], p[2], p[3]].map(f32::from));
            if mask.is_set(x, y) {
                state.push(State::Inside);
                time.push(UNREACHED);
            } else {
                state.push(State::Known);
                time.push(0.0_f32);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let at = |x: i64, y: i64| (y * w + x) as usize;
    let in_bounds = |x: i64, y: i64| x >= 0 && y >= 0 && x < w && y < h;

    // Known pixels touching the mask form the initial front.
    let mut heap = BinaryHeap::new();
    for y in 0..h {
        for x in 0..w {
            let i = at(x, y);
            if state[i] != State::Known {
                continue;
            }
            let touches_mask = neighbours4(x, y)
                .into_iter()
                .any(|(nx, ny)| in_bounds(nx, ny) && state[at(nx, ny)] == State::Inside);
            if touches_mask {
                state[i] = State::Band;
                heap.push(Front { time: 0.0, index: i });
            }
        }
    }

    while let Some(Front { index, .. }) = heap.pop() {
        if state[index] == State::Known {
            continue;
        }
        state[index] = State::Known;
        #[allow(clippy::cast_possible_wrap)]
        let (px, py) = (index as i64 % w, index as i64 / w);

        for (nx, ny) in neighbours4(px, py) {
            if !in_bounds(nx, ny) || state[at(nx, ny)] != State::Inside {
                continue;
            }
            let ni = at(nx, ny);
            let t = arrival_time(nx, ny, &state, &time, w, h);
            time[ni] = t;
            pixels[ni] = fill_value(nx, ny, &pixels, &state, &time, w, h);
            state[ni] = State::Band;
            heap.push(Front { time: t, index: ni });
        }
    }

    let mut local = pixels.iter();
    for y in oy..area.bottom() {
        for x in ox..area.right() {
            let Some(value) = local.next() else {
                return;
            };
            if !mask.is_set(x, y) {
                continue;
            }
            let px = image.get_pixel_mut(x, y);
            for ch in 0..4 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = value[ch].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

/// Pixels the fill can read: the mask's bounds plus the sampling radius and
/// one more ring for the initial front, clipped to the image.
fn work_area(mask: &Mask) -> Option<Region> {
    let (width, height) = mask.dimensions();
    mask.bounds()
        .map(|bounds| bounds.padded(WORK_MARGIN, width, height))
}

fn neighbours4(x: i64, y: i64) -> [(i64, i64); 4] {
    [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
}

/// Arrival time at `(x, y)` from the eikonal equation `|grad T| = 1`.
fn arrival_time(x: i64, y: i64, state: &[State], time: &[f32], w: i64, h: i64) -> f32 {
    let pairs = [
        ((x - 1, y), (x, y - 1)),
        ((x + 1, y), (x, y - 1)),
        ((x - 1, y), (x, y + 1)),
        ((x + 1, y), (x, y + 1)),
    ];
    pairs
        .iter()
        .map(|&(a, b)| {
            solve_eikonal(
                settled_time(a, state, time, w, h),
                settled_time(b, state, time, w, h),
            )
        })
        .fold(UNREACHED, f32::min)
}

fn settled_time((x, y): (i64, i64), state: &[State], time: &[f32], w: i64, h: i64) -> Option<f32> {
    if x < 0 || y < 0 || x >= w || y >= h {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let i = (y * w + x) as usize;
    (state[i] != State::Inside).then_some(time[i])
}

fn solve_eikonal(a: Option<f32>, b: Option<f32>) -> f32 {
    match (a, b) {
        (Some(ta), Some(tb)) => {
            let diff = ta - tb;
            let r = (2.0 - diff * diff).max(0.0).sqrt();
            let s = (ta + tb - r) / 2.0;
            if s >= ta && s >= tb {
                s
            } else if s + r >= ta && s + r >= tb {
                s + r
            } else {
                1.0 + ta.min(tb)
            }
        }
        (Some(t), None) | (None, Some(t)) => 1.0 + t,
        (None, None) => UNREACHED,
    }
}

/// Gradient of the arrival-time field at `(x, y)`, using settled neighbours only.
fn time_gradient(x: i64, y: i64, state: &[State], time: &[f32], w: i64, h: i64) -> (f32, f32) {
    let t = |px, py| settled_time((px, py), state, time, w, h);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let here = time[(y * w + x) as usize];
    let axis = |prev: Option<f32>, next: Option<f32>| match (prev, next) {
        (Some(p), Some(n)) => (n - p) / 2.0,
        (None, Some(n)) => n - here,
        (Some(p), None) => here - p,
        (None, None) => 0.0,
    };
    (
        axis(t(x - 1, y), t(x + 1, y)),
        axis(t(x, y - 1), t(x, y + 1)),
    )
}

#[allow(clippy::cast_precision_loss)]
fn fill_value(
    x: i64,
    y: i64,
    pixels: &[[f32; 4]],
    state: &[State],
    time: &[f32],
    w: i64,
    h: i64,
) -> [f32; 4] {
    let (gx, gy) = time_gradient(x, y, state, time, w, h);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let here = (y * w + x) as usize;
    let t_here = time[here];

    let mut sum = [0.0_f32; 4];
    let mut weight_sum = 0.0_f32;

    for qy in (y - INPAINT_RADIUS)..=(y + INPAINT_RADIUS) {
        for qx in (x - INPAINT_RADIUS)..=(x + INPAINT_RADIUS) {
            let Some(t_q) = settled_time((qx, qy), state, time, w, h) else {
                continue;
            };
            let (rx, ry) = ((x - qx) as f32, (y - qy) as f32);
            let len_sq = rx * rx + ry * ry;
            if len_sq == 0.0 || len_sq > (INPAINT_RADIUS * INPAINT_RADIUS) as f32 {
                continue;
            }

            let distance = 1.0 / (len_sq * len_sq.sqrt());
            let level = 1.0 / (1.0 + (t_q - t_here).abs());
            let mut direction = (rx * gx + ry * gy).abs();
            if direction <= MIN_DIRECTION {
                direction = 1.0e-6;
            }
            let weight = distance * level * direction;

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let q = pixels[(qy * w + qx) as usize];
            for ch in 0..4 {
                sum[ch] += weight * q[ch];
            }
            weight_sum += weight;
        }
    }

    if weight_sum <= 0.0 {
        return pixels[here];
    }
    sum.map(|s| s / weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::MASK_SET;
    use image::Rgba;

    /// Smooth horizontal gradient with a little vertical texture.
    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (x * 255 / (width - 1)) as u8;
            #[allow(clippy::cast_possible_truncation)]
            let t = ((y * 7) % 11) as u8;
            Rgba([v, 255 - v, t, 255])
        })
    }

    #[test]
    fn empty_region_list_leaves_image_unchanged() {
        let img = gradient(32, 32);
        assert_eq!(remove(&img, &[]), img);
    }

    #[test]
    fn pixels_outside_mask_are_byte_identical() {
        let img = gradient(64, 48);
        let regions = [
            Region {
                x: 10,
                y: 10,
                width: 12,
                height: 6,
            },
            Region {
                x: 40,
                y: 30,
                width: 20,
                height: 18,
            },
        ];
        let out = remove(&img, &regions);
        for (x, y, px) in img.enumerate_pixels() {
            if regions.iter().any(|r| r.contains(x, y)) {
                continue;
            }
            assert_eq!(out.get_pixel(x, y), px, "pixel ({x},{y}) changed");
        }
    }

    #[test]
    fn masked_stamp_is_replaced_by_surroundings() {
        let mut img = RgbaImage::from_pixel(40, 40, Rgba([90, 120, 150, 255]));
        for y in 18..22 {
            for x in 12..28 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let region = Region {
            x: 10,
            y: 16,
            width: 20,
            height: 8,
        };
        let out = remove(&img, &[region]);
        for y in 18..22 {
            for x in 12..28 {
                let px = out.get_pixel(x, y);
                for ch in 0..3 {
                    let expected = [90i32, 120, 150][ch];
                    assert!(
                        (i32::from(px[ch]) - expected).abs() <= 1,
                        "pixel ({x},{y}) ch {ch} = {}",
                        px[ch]
                    );
                }
            }
        }
    }

    #[test]
    fn fill_follows_gradient() {
        let img = gradient(64, 32);
        let region = Region {
            x: 28,
            y: 12,
            width: 8,
            height: 8,
        };
        let out = remove(&img, &[region]);
        let left = i32::from(out.get_pixel(28, 16)[0]);
        let right = i32::from(out.get_pixel(35, 16)[0]);
        assert!(right > left, "fill should keep the left-to-right ramp");
    }

    #[test]
    fn region_on_image_border_is_filled() {
        let mut img = RgbaImage::from_pixel(30, 30, Rgba([10, 200, 10, 255]));
        for x in 0..30 {
            img.put_pixel(x, 29, Rgba([0, 0, 0, 255]));
        }
        let band = Region {
            x: 0,
            y: 26,
            width: 30,
            height: 4,
        };
        let out = remove(&img, &[band]);
        for x in 0..30 {
            assert_eq!(*out.get_pixel(x, 29), Rgba([10, 200, 10, 255]));
        }
    }

    #[test]
    fn full_mask_has_nothing_to_sample() {
        let img = gradient(8, 8);
        let all = Region {
            x: 0,
            y: 0,
            width: 8,
            height: 8,
        };
        let out = remove(&img, &[all]);
        assert_eq!(out, img);
    }

    #[test]
    fn work_area_hugs_the_mask() {
        let mut mask = Mask::new(4000, 3000);
        assert!(work_area(&mask).is_none());
        for y in 2990..3000 {
            for x in 3960..3990 {
                mask.set(x, y, MASK_SET);
            }
        }
        let area = work_area(&mask).unwrap();
        let expected = Region {
            x: 3956,
            y: 2986,
            width: 38,
            height: 14,
        };
        assert_eq!(area, expected);
    }

    #[test]
    fn small_mark_on_large_image_is_filled_locally() {
        let mut img = gradient(1200, 900);
        let original = img.clone();
        let region = Region {
            x: 1170,
            y: 880,
            width: 20,
            height: 12,
        };
        for y in 882..890 {
            for x in 1172..1188 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let out = remove(&img, &[region]);
        for (x, y, px) in img.enumerate_pixels() {
            if !region.contains(x, y) {
                assert_eq!(out.get_pixel(x, y), px, "pixel ({x},{y}) changed");
            }
        }
        for y in 882..890 {
            for x in 1172..1188 {
                let filled = i32::from(out.get_pixel(x, y)[0]);
                let before = i32::from(original.get_pixel(x, y)[0]);
                assert!((filled - before).abs() <= 6, "pixel ({x},{y}) = {filled}");
            }
        }
    }
}
