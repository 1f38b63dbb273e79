//! Rectangles and per-pixel removal masks in image coordinates.

use image::{GrayImage, Luma, RgbaImage};

/// Mask value marking a pixel for full removal.
pub const MASK_SET: u8 = u8::MAX;
/// Mask value marking a pixel to keep untouched.
pub const MASK_CLEAR: u8 = 0;

/// An axis-aligned rectangle that always lies inside the image it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge, inclusive.
    pub x: u32,
    /// Top edge, inclusive.
    pub y: u32,
    /// Width in pixels, never zero.
    pub width: u32,
    /// Height in pixels, never zero.
    pub height: u32,
}

impl Region {
    /// Build a region clipped to an `img_w` x `img_h` image.
    ///
    /// Returns `None` when nothing of the rectangle survives clipping.
    // Bounds are within [0, img_w] / [0, img_h] after clipping.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clipped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        img_w: u32,
        img_h: u32,
    ) -> Option<Self> {
        let x1 = x.max(0);
        let y1 = y.max(0);
        let x2 = (x + width).min(i64::from(img_w));
        let y2 = (y + height).min(i64::from(img_h));
        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    /// Build a region from fractional edges (`0.0..=1.0`) of an image.
    ///
    /// Edges are truncated toward zero, matching integer pixel slicing.
    #[must_use]
    pub fn from_fractions(
        img_w: u32,
        img_h: u32,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    ) -> Option<Self> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let edge = |size: u32, frac: f32| (size as f32 * frac) as i64;
        let x1 = edge(img_w, left);
        let y1 = edge(img_h, top);
        let x2 = edge(img_w, right);
        let y2 = edge(img_h, bottom);
        Self::clipped(x1, y1, x2 - x1, y2 - y1, img_w, img_h)
    }

    /// Grow the region by `padding` pixels on every side, clipped to the image.
    #[must_use]
    pub fn padded(&self, padding: u32, img_w: u32, img_h: u32) -> Self {
        let p = i64::from(padding);
        Self::clipped(
            i64::from(self.x) - p,
            i64::from(self.y) - p,
            i64::from(self.width) + 2 * p,
            i64::from(self.height) + 2 * p,
            img_w,
            img_h,
        )
        .unwrap_or(*self)
    }

    /// Number of pixels covered.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Exclusive right edge.
    #[must_use]
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether the pixel `(px, py)` falls inside the region.
    #[must_use]
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// A per-pixel removal map with the same dimensions as its source image.
///
/// `0` keeps a pixel, `255` removes it fully, values in between remove it
/// partially (used for soft edges and soft AI mattes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    data: GrayImage,
}

impl Mask {
    /// An empty mask (nothing removed).
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: GrayImage::new(width, height),
        }
    }

    /// A binary mask with every pixel of `regions` set.
    #[must_use]
    pub fn from_regions(width: u32, height: u32, regions: &[Region]) -> Self {
        let mut mask = Self::new(width, height);
        for region in regions {
            for y in region.y..region.bottom().min(height) {
                for x in region.x..region.right().min(width) {
                    mask.data.put_pixel(x, y, Luma([MASK_SET]));
                }
            }
        }
        mask
    }

    /// Wrap an existing grayscale removal map.
    #[must_use]
    pub fn from_gray(data: GrayImage) -> Self {
        Self { data }
    }

    /// `(width, height)` of the mask.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.data.dimensions()
    }

    /// Removal strength at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data.get_pixel(x, y)[0]
    }

    /// Set the removal strength at `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        self.data.put_pixel(x, y, Luma([value]));
    }

    /// Whether `(x, y)` is marked for any amount of removal.
    #[must_use]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.get(x, y) > MASK_CLEAR
    }

    /// Smallest region containing every marked pixel, or `None` if the mask is
    /// empty.
    #[must_use]
    pub fn bounds(&self) -> Option<Region> {
        let mut extent: Option<(u32, u32, u32, u32)> = None;
        for (x, y, m) in self.data.enumerate_pixels() {
            if m[0] == MASK_CLEAR {
                continue;
            }
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }
        extent.map(|(x1, y1, x2, y2)| Region {
            x: x1,
            y: y1,
            width: x2 - x1 + 1,
            height: y2 - y1 + 1,
        })
    }

    /// Fraction of pixels marked for any amount of removal.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f32 {
        let total = self.data.len();
        if total == 0 {
            return 0.0;
        }
        let set = self.data.as_raw().iter().filter(|&&v| v > MASK_CLEAR).count();
        set as f32 / total as f32
    }

    /// Make masked pixels transparent.
    ///
    /// The new alpha is `min(alpha, 255 - mask)`, so pixels that are already
    /// transparent never regain opacity and repeated application is stable.
    pub fn apply_as_alpha(&self, image: &mut RgbaImage) {
        debug_assert_eq!(image.dimensions(), self.dimensions());
        for (px, m) in image.pixels_mut().zip(self.data.pixels()) {
            let keep = MASK_SET - m[0];
            px[3] = px[3].min(keep);
        }
    }
}
