//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Every call to [`process_with_diagnostics`](crate::process_with_diagnostics)
//! collects diagnostics alongside the pipeline result. Stages that did
//! not run (detection when cropping is off, rectification on fallback)
//! are `None`.
//!
//! Duration measurements use [`std::time::Duration`] (platform-agnostic).
//! Timestamps are captured internally via the `web-time` crate, which
//! uses `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineState;
use crate::types::{Contour, ProcessingMode};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Edge preprocessing (only when cropping).
    pub preprocess: Option<StageDiagnostics>,
    /// Contour extraction and quad selection (only when cropping).
    pub detection: Option<StageDiagnostics>,
    /// Perspective rectification (only when a quad was found).
    pub rectify: Option<StageDiagnostics>,
    /// Post-filter.
    pub filter: StageDiagnostics,
    /// States the run passed through, in order.
    pub states: Vec<PipelineState>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the run.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Edge preprocessing metrics.
    Preprocess {
        /// Number of edge pixels (value == 255) in the output.
        edge_pixel_count: u64,
        /// Total pixel count for computing edge density.
        total_pixel_count: u64,
    },
    /// Contour extraction and quadrilateral selection metrics.
    Detection {
        /// Number of contours traced.
        contour_count: usize,
        /// Total number of points across all contours.
        total_point_count: usize,
        /// Contours whose approximation had four vertices.
        quad_count: usize,
        /// Quads that passed the area and aspect tests.
        candidate_count: usize,
        /// Area ratio of the chosen quad, if any.
        best_area_ratio: Option<f64>,
    },
    /// Rectification metrics.
    Rectify {
        /// Output width in pixels.
        output_width: u32,
        /// Output height in pixels.
        output_height: u32,
    },
    /// Post-filter metrics.
    Filter {
        /// Which filter ran.
        mode: ProcessingMode,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub input_width: u32,
    /// Source image height in pixels.
    pub input_height: u32,
    /// Output image width in pixels.
    pub output_width: u32,
    /// Output image height in pixels.
    pub output_height: u32,
    /// Whether detection was requested.
    pub do_crop: bool,
    /// Whether detection missed and the full frame was kept.
    pub used_fallback: bool,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Scan Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Input: {}x{}  ->  Output: {}x{}",
            self.summary.input_width,
            self.summary.input_height,
            self.summary.output_width,
            self.summary.output_height,
        ));
        lines.push(format!(
            "Crop: {}  |  Fallback: {}",
            if self.summary.do_crop { "on" } else { "off" },
            if self.summary.used_fallback { "yes" } else { "no" },
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        let mut path = String::new();
        for (i, state) in self.states.iter().enumerate() {
            if i > 0 {
                path.push_str(" -> ");
            }
            let _ = write!(path, "{state}");
        }
        lines.push(format!("States: {path}"));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);

        let stages = [
            ("Preprocess", self.preprocess.as_ref()),
            ("Detection", self.detection.as_ref()),
            ("Rectify", self.rectify.as_ref()),
            ("Filter", Some(&self.filter)),
        ];

        for (name, diag) in stages {
            let Some(diag) = diag else {
                lines.push(format!("{name:<24} {:>10} {:>10}  skipped", "-", "-"));
                continue;
            };
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Preprocess {
            edge_pixel_count,
            total_pixel_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixel_count > 0 {
                *edge_pixel_count as f64 / *total_pixel_count as f64 * 100.0
            } else {
                0.0
            };
            format!("edges={edge_pixel_count} ({density:.1}%)")
        }
        StageMetrics::Detection {
            contour_count,
            total_point_count,
            quad_count,
            candidate_count,
            best_area_ratio,
        } => {
            let best = best_area_ratio.map_or_else(|| "none".to_owned(), |r| format!("{r:.3}"));
            format!(
                "{contour_count} contours, {total_point_count} pts, {quad_count} quads, {candidate_count} candidates, best={best}",
            )
        }
        StageMetrics::Rectify {
            output_width,
            output_height,
        } => format!("{output_width}x{output_height}"),
        StageMetrics::Filter { mode } => format!("mode={mode}"),
    }
}

/// Count edge pixels (value == 255) in a grayscale image.
pub(crate) fn count_edge_pixels(image: &image::GrayImage) -> u64 {
    image
        .pixels()
        .map(|p| u64::from(u8::from(p.0[0] == 255)))
        .sum()
}

/// Total points across a slice of contours.
pub(crate) fn total_points(contours: &[Contour]) -> usize {
    contours.iter().map(Contour::len).sum()
}
