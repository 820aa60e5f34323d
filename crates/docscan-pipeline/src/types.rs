//! Shared types for the docscan document pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference edge maps
/// and luma intermediates without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage`, the raster every stage hands to the next.
pub use image::RgbaImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A closed boundary curve traced from an edge map.
///
/// Points are integral pixel coordinates stored as `f64`. The last
/// point connects back to the first; the closing point is not repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour(Vec<Point>);

impl Contour {
    /// Create a new contour from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the contour has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the contour.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the contour and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Length of the closed curve, including the segment from the last
    /// point back to the first.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let n = self.0.len();
        if n < 2 {
            return 0.0;
        }
        (0..n)
            .map(|i| self.0[i].distance(self.0[(i + 1) % n]))
            .sum()
    }

    /// Enclosed area by the shoelace formula (always non-negative).
    #[must_use]
    pub fn area(&self) -> f64 {
        let n = self.0.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let a = self.0[i];
                let b = self.0[(i + 1) % n];
                a.x.mul_add(b.y, -(b.x * a.y))
            })
            .sum();
        twice.abs() / 2.0
    }
}

/// Four document corners in canonical order.
///
/// Produced by [`crate::quad::order_quad`]. The assignment assumes a
/// convex, roughly axis-oriented quadrilateral; self-intersecting or
/// heavily skewed input may map two roles to the same point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedQuad {
    /// Top-left corner (minimum `x + y`).
    pub tl: Point,
    /// Top-right corner (minimum `y - x`).
    pub tr: Point,
    /// Bottom-right corner (maximum `x + y`).
    pub br: Point,
    /// Bottom-left corner (maximum `y - x`).
    pub bl: Point,
}

impl OrderedQuad {
    /// Corners as an array in `tl, tr, br, bl` order.
    #[must_use]
    pub const fn corners(&self) -> [Point; 4] {
        [self.tl, self.tr, self.br, self.bl]
    }

    /// Longer of the top and bottom edge lengths.
    #[must_use]
    pub fn max_width(&self) -> f64 {
        self.tl.distance(self.tr).max(self.bl.distance(self.br))
    }

    /// Longer of the left and right edge lengths.
    #[must_use]
    pub fn max_height(&self) -> f64 {
        self.tl.distance(self.bl).max(self.tr.distance(self.br))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an RGBA raster.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count as `f64`, used as the denominator of area ratios.
    #[must_use]
    pub fn area(self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// Post-filter applied to the rectified (or fallback) image.
///
/// Serialized with the wire names used by the worker protocol. Unknown
/// names fail to parse rather than silently meaning "original".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Pass-through, no pixel change.
    #[default]
    #[serde(rename = "original")]
    Identity,
    /// Luma broadcast to R, G and B.
    #[serde(rename = "gray")]
    Grayscale,
    /// Local adaptive threshold, black text on white.
    #[serde(rename = "bw")]
    AdaptiveBinary,
    /// Contrast-limited adaptive histogram equalization.
    #[serde(rename = "auto")]
    AutoEnhance,
}

impl ProcessingMode {
    /// Every mode, in wire-name order.
    pub const ALL: [Self; 4] = [
        Self::Identity,
        Self::Grayscale,
        Self::AdaptiveBinary,
        Self::AutoEnhance,
    ];

    /// The protocol name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "original",
            Self::Grayscale => "gray",
            Self::AdaptiveBinary => "bw",
            Self::AutoEnhance => "auto",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| PipelineError::InvalidMode(s.to_owned()))
    }
}

/// Acceptance criteria for document quadrilateral candidates.
///
/// # Invariants
///
/// `min_area_ratio` lies in `[0, 1]`, both aspect bounds are finite and
/// positive, and `aspect_min <= aspect_max`. [`validate`](Self::validate)
/// checks these; the selector assumes them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadCriteria {
    /// Minimum fraction of the frame the quad must cover (inclusive).
    pub min_area_ratio: f64,
    /// Smallest accepted `width / height` (inclusive).
    pub aspect_min: f64,
    /// Largest accepted `width / height` (inclusive).
    pub aspect_max: f64,
}

impl QuadCriteria {
    /// Default minimum area ratio: the page covers at least a fifth of the frame.
    pub const DEFAULT_MIN_AREA_RATIO: f64 = 0.20;
    /// Default lower aspect bound (tall portrait pages).
    pub const DEFAULT_ASPECT_MIN: f64 = 0.5;
    /// Default upper aspect bound (landscape pages, excluding banners).
    pub const DEFAULT_ASPECT_MAX: f64 = 2.2;

    /// Check the invariants listed on the type.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.min_area_ratio) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_area_ratio must be within [0, 1], got {}",
                self.min_area_ratio
            )));
        }
        for (name, value) in [
            ("aspect_min", self.aspect_min),
            ("aspect_max", self.aspect_max),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if self.aspect_min > self.aspect_max {
            return Err(PipelineError::InvalidConfig(format!(
                "aspect_min ({}) exceeds aspect_max ({})",
                self.aspect_min, self.aspect_max
            )));
        }
        Ok(())
    }
}

impl Default for QuadCriteria {
    fn default() -> Self {
        Self {
            min_area_ratio: Self::DEFAULT_MIN_AREA_RATIO,
            aspect_min: Self::DEFAULT_ASPECT_MIN,
            aspect_max: Self::DEFAULT_ASPECT_MAX,
        }
    }
}

/// Everything one pipeline invocation needs besides the image itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Post-filter to apply after cropping.
    pub mode: ProcessingMode,
    /// Whether to detect and rectify the document before filtering.
    pub do_crop: bool,
    /// Candidate acceptance criteria used when `do_crop` is set.
    pub criteria: QuadCriteria,
}

impl ScanOptions {
    /// Options with default criteria.
    #[must_use]
    pub fn new(mode: ProcessingMode, do_crop: bool) -> Self {
        Self {
            mode,
            do_crop,
            criteria: QuadCriteria::default(),
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new(ProcessingMode::default(), true)
    }
}

/// Result of one pipeline run.
///
/// `used_fallback` is set when cropping was requested but no qualifying
/// quadrilateral was found, so the full frame was filtered unrectified.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The processed image.
    pub image: RgbaImage,
    /// `true` when detection missed and the original frame was kept.
    pub used_fallback: bool,
    /// The corners used for rectification, if any.
    pub quad: Option<OrderedQuad>,
}

/// Which taxonomy class an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: the pipeline never started.
    Input,
    /// Something went wrong inside a geometric or resampling step.
    Processing,
}

/// Errors that can occur during pipeline processing.
///
/// A missed detection is not an error; see [`PipelineResult::used_fallback`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode an encoded input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Width or height is zero or too large to address.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },

    /// The pixel buffer does not hold exactly `width * height * 4` bytes.
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BufferSizeMismatch {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Required byte length.
        expected: usize,
        /// Received byte length.
        actual: usize,
    },

    /// A processing mode name was not recognized.
    #[error("unrecognized processing mode {0:?} (expected original, gray, bw or auto)")]
    InvalidMode(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The corner correspondence does not determine a usable homography.
    #[error("perspective transform is degenerate for corners {0:?}")]
    DegenerateTransform(OrderedQuad),
}

impl PipelineError {
    /// Classify this error for the worker boundary.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageDecode(_)
            | Self::EmptyInput
            | Self::InvalidDimensions { .. }
            | Self::BufferSizeMismatch { .. }
            | Self::InvalidMode(_)
            | Self::InvalidConfig(_) => ErrorKind::Input,
            Self::DegenerateTransform(_) => ErrorKind::Processing,
        }
    }
}
