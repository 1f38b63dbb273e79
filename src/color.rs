//! Background colors, matching tolerances and border-sampling auto detection.
//!
//! Colors are compared with the Chebyshev distance (largest per-channel
//! difference), so a tolerance of `t` accepts every pixel inside the
//! `±t` cube around the target.

use std::fmt;
use std::str::FromStr;

use image::RgbaImage;

use crate::error::{Error, Result};

/// Tolerance applied to colors found by [`detect_background_color`].
pub const AUTO_TOLERANCE: u8 = 30;
/// Sample every N pixels along each image edge.
const EDGE_SAMPLE_INTERVAL: u32 = 10;
/// Samples within this distance of a cluster seed count toward that cluster.
const CLUSTER_TOLERANCE: u8 = 16;
/// Minimum share of samples the winning cluster must hold to be trusted.
const MIN_DOMINANT_SHARE: f32 = 0.3;

/// An RGB target color together with its matching tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    /// Red, green, blue.
    pub rgb: [u8; 3],
    /// Maximum per-channel difference still considered a match.
    pub tolerance: u8,
}

impl Color {
    /// Create a color with an explicit tolerance.
    #[must_use]
    pub const fn new(rgb: [u8; 3], tolerance: u8) -> Self {
        Self { rgb, tolerance }
    }

    /// Chebyshev distance between this color and `px`.
    #[must_use]
    pub fn distance(&self, px: [u8; 3]) -> u8 {
        self.rgb
            .iter()
            .zip(px.iter())
            .map(|(&a, &b)| a.abs_diff(b))
            .max()
            .unwrap_or(0)
    }

    /// Whether `px` lies within tolerance of this color.
    #[must_use]
    pub fn matches(&self, px: [u8; 3]) -> bool {
        self.distance(px) <= self.tolerance
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.rgb;
        write!(f, "#{r:02x}{g:02x}{b:02x} (±{})", self.tolerance)
    }
}

/// The predefined background colors selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedColor {
    /// Pure white, tolerance 30.
    White,
    /// Chroma-key green, tolerance 60.
    Green,
    /// Chroma-key blue, tolerance 60.
    Blue,
    /// Pure black, tolerance 30.
    Black,
}

impl NamedColor {
    /// The target color and empirically tuned tolerance for this name.
    ///
    /// Chroma-key screens are lit unevenly, hence their wider tolerance.
    #[must_use]
    pub const fn color(self) -> Color {
        match self {
            Self::White => Color::new([255, 255, 255], 30),
            Self::Green => Color::new([0, 255, 0], 60),
            Self::Blue => Color::new([0, 0, 255], 60),
            Self::Black => Color::new([0, 0, 0], 30),
        }
    }

    /// Lowercase name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Black => "black",
        }
    }
}

/// What the user asked to treat as background: a named color or auto-detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSpec {
    /// One of the predefined colors.
    Named(NamedColor),
    /// Detect the color from the image border.
    Auto,
}

impl FromStr for BackgroundSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Self::Named(NamedColor::White)),
            "green" => Ok(Self::Named(NamedColor::Green)),
            "blue" => Ok(Self::Named(NamedColor::Blue)),
            "black" => Ok(Self::Named(NamedColor::Black)),
            "auto" => Ok(Self::Auto),
            other => Err(Error::InvalidOption(format!(
                "unknown background color '{other}' (expected white, green, blue, black or auto)"
            ))),
        }
    }
}

impl fmt::Display for BackgroundSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(named) => f.write_str(named.name()),
            Self::Auto => f.write_str("auto"),
        }
    }
}

struct Cluster {
    seed: [u8; 3],
    sum: [u64; 3],
    count: u32,
}

/// Guess the dominant background color by sampling the image border.
///
/// Corners plus every 10th pixel of the top/bottom rows and left/right columns
/// are grouped into clusters of near-identical colors. The mean of the largest
/// cluster wins if it holds at least 30% of the samples; otherwise the result
/// falls back to white. Fully transparent samples are ignored.
#[must_use]
pub fn detect_background_color(image: &RgbaImage) -> Color {
    let fallback = Color::new(NamedColor::White.color().rgb, AUTO_TOLERANCE);
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return fallback;
    }

    let mut sample_points = vec![
        (0, 0),
        (width - 1, 0),
        (0, height - 1),
        (width - 1, height - 1),
    ];
    for x in (0..width).step_by(EDGE_SAMPLE_INTERVAL as usize) {
        sample_points.push((x, 0));
        sample_points.push((x, height - 1));
    }
    for y in (0..height).step_by(EDGE_SAMPLE_INTERVAL as usize) {
        sample_points.push((0, y));
        sample_points.push((width - 1, y));
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    let mut total = 0u32;
    for &(x, y) in &sample_points {
        let px = image.get_pixel(x, y);
        if px[3] == 0 {
            continue;
        }
        let rgb = [px[0], px[1], px[2]];
        total += 1;

        let probe = Color::new(rgb, CLUSTER_TOLERANCE);
        match clusters.iter_mut().find(|c| probe.matches(c.seed)) {
            Some(cluster) => {
                for (acc, &v) in cluster.sum.iter_mut().zip(rgb.iter()) {
                    *acc += u64::from(v);
                }
                cluster.count += 1;
            }
            None => clusters.push(Cluster {
                seed: rgb,
                sum: rgb.map(u64::from),
                count: 1,
            }),
        }
    }

    let Some(best) = clusters.iter().max_by_key(|c| c.count) else {
        log::debug!("no opaque border samples, using white");
        return fallback;
    };

    #[allow(clippy::cast_precision_loss)]
    let share = best.count as f32 / total as f32;
    if share < MIN_DOMINANT_SHARE {
        log::debug!(
            "dominant border color holds only {:.0}% of samples, using white",
            share * 100.0
        );
        return fallback;
    }

    // Mean of u8 values always fits in u8.
    #[allow(clippy::cast_possible_truncation)]
    let rgb = best.sum.map(|s| (s / u64::from(best.count)) as u8);
    let color = Color::new(rgb, AUTO_TOLERANCE);
    log::debug!(
        "detected background {color} from {}/{total} border samples",
        best.count
    );
    color
}
