//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire scan in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use docscan_pipeline::{Pipeline, PipelineError, ScanOptions};
//! # fn run(image: image::RgbaImage) -> Result<(), PipelineError> {
//! let result = Pipeline::new(image, ScanOptions::default())
//!     .preprocess()
//!     .detect()
//!     .rectify()?
//!     .filter()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next stage (or
//! `Result` for the one fallible stage). Intermediates that later stages
//! do not need are dropped as soon as the stage producing the next one
//! returns: the edge map does not outlive detection, and the source
//! raster does not outlive rectification.
//!
//! When cropping is disabled, [`Pending::skip_crop`] jumps straight to
//! the filtering stage.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contour::extract_contours;
use crate::diagnostics::{StageMetrics, count_edge_pixels, total_points};
use crate::quad::{CropCandidate, SelectionStats, order_quad, select_with_stats};
use crate::types::{
    Dimensions, GrayImage, OrderedQuad, PipelineError, PipelineResult, RgbaImage, ScanOptions,
};

/// Named states of one scan, for logs and diagnostics.
///
/// `Failed` is reachable from any state; `Done` only after filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing has run yet.
    Idle,
    /// Building the edge map.
    Preprocessing,
    /// Tracing contours and choosing a quadrilateral.
    Detecting,
    /// Warping the document to a rectangle.
    Rectifying,
    /// Applying the post-filter.
    Filtering,
    /// Result ready.
    Done,
    /// A stage returned an error.
    Failed,
}

impl PipelineState {
    /// Human-readable state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Preprocessing => "Preprocessing",
            Self::Detecting => "Detecting",
            Self::Rectifying => "Rectifying",
            Self::Filtering => "Filtering",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point for the staged pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a source raster and options.
    ///
    /// No processing is performed. Call [`.preprocess()`](Pending::preprocess)
    /// or [`.skip_crop()`](Pending::skip_crop) to begin.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: RgbaImage, options: ScanOptions) -> Pending {
        Pending { options, image }
    }
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing; call .preprocess() or .skip_crop() to continue"]
pub struct Pending {
    options: ScanOptions,
    image: RgbaImage,
}

impl Pending {
    /// The source raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// The options this run was created with.
    #[must_use]
    pub const fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Build the binary edge map and advance to [`Preprocessed`].
    pub fn preprocess(self) -> Preprocessed {
        let edges = crate::edge::preprocess(&self.image);
        debug!(edge_pixels = count_edge_pixels(&edges), "edge map built");
        Preprocessed {
            options: self.options,
            image: self.image,
            edges,
        }
    }

    /// Skip detection and rectification, keeping the full frame.
    ///
    /// The result does not count as a fallback: no detection was asked for.
    pub fn skip_crop(self) -> Rectified {
        Rectified {
            options: self.options,
            image: self.image,
            used_fallback: false,
            quad: None,
        }
    }
}

// ───────────────────────── Stage 1: Preprocessed ─────────────────────

/// Pipeline state after edge detection.
#[must_use = "pipeline stages are consumed by advancing; call .detect() to continue"]
pub struct Preprocessed {
    options: ScanOptions,
    image: RgbaImage,
    edges: GrayImage,
}

impl Preprocessed {
    /// The binary edge map (255 = edge).
    #[must_use]
    pub const fn edges(&self) -> &GrayImage {
        &self.edges
    }

    /// Metrics describing this stage's output.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Preprocess {
            edge_pixel_count: count_edge_pixels(&self.edges),
            total_pixel_count: u64::from(self.edges.width()) * u64::from(self.edges.height()),
        }
    }

    /// Trace contours, choose the best quadrilateral, and advance to
    /// [`Detected`]. The edge map is dropped here.
    pub fn detect(self) -> Detected {
        let contours = extract_contours(&self.edges);
        let image_area = Dimensions::of(&self.image).area();
        let (candidate, stats) = select_with_stats(&contours, image_area, &self.options.criteria);
        debug!(
            contours = stats.contours,
            quads = stats.quads,
            candidates = stats.candidates,
            "detection finished"
        );
        Detected {
            options: self.options,
            image: self.image,
            candidate,
            stats,
            point_count: total_points(&contours),
        }
    }
}

// ───────────────────────── Stage 2: Detected ─────────────────────────

/// Pipeline state after quadrilateral selection.
///
/// [`candidate`](Self::candidate) is `None` when nothing qualified; the
/// next stage then keeps the full frame and flags the result as a
/// fallback.
#[must_use = "pipeline stages are consumed by advancing; call .rectify() to continue"]
pub struct Detected {
    options: ScanOptions,
    image: RgbaImage,
    candidate: Option<CropCandidate>,
    stats: SelectionStats,
    point_count: usize,
}

impl Detected {
    /// The chosen quadrilateral, if any.
    #[must_use]
    pub const fn candidate(&self) -> Option<&CropCandidate> {
        self.candidate.as_ref()
    }

    /// Metrics describing this stage's output.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Detection {
            contour_count: self.stats.contours,
            total_point_count: self.point_count,
            quad_count: self.stats.quads,
            candidate_count: self.stats.candidates,
            best_area_ratio: self.candidate.map(|c| c.area_ratio),
        }
    }

    /// Warp the chosen quad to a rectangle, or keep the full frame when
    /// there is none, and advance to [`Rectified`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateTransform`] if the chosen
    /// corners do not determine a projective transform.
    pub fn rectify(self) -> Result<Rectified, PipelineError> {
        let Some(candidate) = self.candidate else {
            info!("no document quadrilateral found, keeping full frame");
            return Ok(Rectified {
                options: self.options,
                image: self.image,
                used_fallback: true,
                quad: None,
            });
        };

        // Order the raw polygon vertices again rather than trusting the
        // scored copy; both come from the same points.
        let quad = order_quad(candidate.vertices);
        let image = crate::rectify::rectify(self.image, &quad)?;
        debug!(
            width = image.width(),
            height = image.height(),
            "document rectified"
        );
        Ok(Rectified {
            options: self.options,
            image,
            used_fallback: false,
            quad: Some(quad),
        })
    }
}

// ───────────────────────── Stage 3: Rectified ────────────────────────

/// Pipeline state after rectification (or fallback, or skipped crop).
#[must_use = "pipeline stages are consumed by advancing; call .filter() to continue"]
pub struct Rectified {
    options: ScanOptions,
    image: RgbaImage,
    used_fallback: bool,
    quad: Option<OrderedQuad>,
}

impl Rectified {
    /// The image the post-filter will run on.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Whether detection missed.
    #[must_use]
    pub const fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    /// The corners used for rectification, if any.
    #[must_use]
    pub const fn quad(&self) -> Option<&OrderedQuad> {
        self.quad.as_ref()
    }

    /// Metrics describing this stage's output.
    #[must_use]
    pub fn metrics(&self) -> StageMetrics {
        StageMetrics::Rectify {
            output_width: self.image.width(),
            output_height: self.image.height(),
        }
    }

    /// Apply the post-filter and advance to [`Filtered`].
    pub fn filter(self) -> Filtered {
        let mode = self.options.mode;
        let image = crate::filter::apply_mode(self.image, mode);
        debug!(%mode, "post-filter applied");
        Filtered {
            image,
            used_fallback: self.used_fallback,
            quad: self.quad,
            mode: self.options.mode,
        }
    }
}

// ───────────────────────── Stage 4: Filtered ─────────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to take the output"]
pub struct Filtered {
    image: RgbaImage,
    used_fallback: bool,
    quad: Option<OrderedQuad>,
    mode: crate::types::ProcessingMode,
}

impl Filtered {
    /// The finished image.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Metrics describing this stage's output.
    #[must_use]
    pub const fn metrics(&self) -> StageMetrics {
        StageMetrics::Filter { mode: self.mode }
    }

    /// Consume the pipeline and return the result.
    #[must_use]
    pub fn into_result(self) -> PipelineResult {
        PipelineResult {
            image: self.image,
            used_fallback: self.used_fallback,
            quad: self.quad,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ProcessingMode, QuadCriteria};

    /// Dark background with a bright axis-aligned page.
    fn page(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x0..x1).contains(&x) && (y0..y1).contains(&y) {
                image::Rgba([235, 235, 230, 255])
            } else {
                image::Rgba([25, 30, 35, 255])
            }
        })
    }

    #[test]
    fn state_names() {
        assert_eq!(PipelineState::Idle.to_string(), "Idle");
        assert_eq!(PipelineState::Failed.as_str(), "Failed");
    }

    #[test]
    fn skip_crop_is_not_fallback() {
        let img = page(40, 30, 5, 5, 35, 25);
        let result = Pipeline::new(img.clone(), ScanOptions::new(ProcessingMode::Identity, false))
            .skip_crop()
            .filter()
            .into_result();
        assert!(!result.used_fallback);
        assert!(result.quad.is_none());
        assert_eq!(result.image, img);
    }

    #[test]
    fn blank_frame_falls_back() {
        let img = RgbaImage::from_pixel(60, 40, image::Rgba([128, 128, 128, 255]));
        let detected = Pipeline::new(img.clone(), ScanOptions::default())
            .preprocess()
            .detect();
        assert!(detected.candidate().is_none());
        let rectified = detected.rectify().unwrap();
        assert!(rectified.used_fallback());
        assert_eq!(rectified.image(), &img);
    }

    #[test]
    fn bright_page_is_detected_and_cropped() {
        let img = page(200, 160, 40, 30, 160, 130);
        let pre = Pipeline::new(img, ScanOptions::default()).preprocess();
        assert!(matches!(
            pre.metrics(),
            StageMetrics::Preprocess { edge_pixel_count, .. } if edge_pixel_count > 0
        ));
        let detected = pre.detect();
        let candidate = *detected.candidate().unwrap();
        assert!(candidate.area_ratio > 0.3 && candidate.area_ratio < 0.45);

        let rectified = detected.rectify().unwrap();
        assert!(!rectified.used_fallback());
        let (w, h) = rectified.image().dimensions();
        assert!((115..=125).contains(&w), "width {w}");
        assert!((95..=105).contains(&h), "height {h}");
        // Interior of the output is page-bright.
        assert!(rectified.image().get_pixel(w / 2, h / 2).0[0] > 200);
    }

    #[test]
    fn strict_criteria_force_fallback() {
        let img = page(200, 160, 40, 30, 160, 130);
        let options = ScanOptions {
            criteria: QuadCriteria {
                min_area_ratio: 0.9,
                ..QuadCriteria::default()
            },
            ..ScanOptions::default()
        };
        let result = Pipeline::new(img, options)
            .preprocess()
            .detect()
            .rectify()
            .unwrap()
            .filter()
            .into_result();
        assert!(result.used_fallback);
        assert_eq!(result.image.dimensions(), (200, 160));
    }

    #[test]
    fn filtered_metrics_report_mode() {
        let img = RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 4]));
        let filtered = Pipeline::new(img, ScanOptions::new(ProcessingMode::AutoEnhance, false))
            .skip_crop()
            .filter();
        assert!(matches!(
            filtered.metrics(),
            StageMetrics::Filter {
                mode: ProcessingMode::AutoEnhance
            }
        ));
    }
}
