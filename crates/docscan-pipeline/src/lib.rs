//! docscan-pipeline: document detection and rectification (sans-IO).
//!
//! Turns a photographed page into a flat, legible scan through:
//! luma -> blur -> Canny edges -> contour tracing -> quadrilateral
//! selection -> perspective rectification -> post-filter.
//!
//! When no page-shaped quadrilateral is found the full frame is kept and
//! the result is flagged as a fallback; that is not an error.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! rasters and returns structured data. Threading and message routing
//! live in `docscan-service` (native) and `docscan-worker` (browser).

pub mod blur;
pub mod clahe;
pub mod contour;
pub mod diagnostics;
pub mod edge;
pub mod engine;
pub mod filter;
pub mod grayscale;
pub mod pipeline;
pub mod protocol;
pub mod quad;
pub mod raster;
pub mod rectify;
pub mod simplify;
pub mod types;

use tracing::{instrument, warn};
use web_time::Instant;

pub use diagnostics::{PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics};
pub use pipeline::{Pipeline, PipelineState};
pub use protocol::{ScanRequest, ScanResponse, handle_request};
pub use quad::{CropCandidate, order_quad, select_best_quad};
pub use types::{
    Contour, Dimensions, ErrorKind, GrayImage, OrderedQuad, PipelineError, PipelineResult, Point,
    ProcessingMode, QuadCriteria, RgbaImage, ScanOptions,
};

/// Run the full scan pipeline.
///
/// # Pipeline steps
///
/// When `options.do_crop` is set:
///
/// 1. Edge map: luma, 5x5 Gaussian, Canny 60/180
/// 2. Contour tracing
/// 3. Quadrilateral selection against `options.criteria`
/// 4. Perspective rectification (skipped on fallback)
///
/// Then, always:
///
/// 5. Post-filter selected by `options.mode`
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if the criteria are invalid,
/// [`PipelineError::InvalidDimensions`] for an empty image, and
/// [`PipelineError::DegenerateTransform`] if rectification fails.
pub fn process(image: RgbaImage, options: &ScanOptions) -> Result<PipelineResult, PipelineError> {
    process_with_diagnostics(image, options).map(|(result, _)| result)
}

/// Run the full pipeline, collecting per-stage timings and counts.
///
/// # Errors
///
/// Same as [`process`].
#[instrument(
    skip(image),
    fields(width = image.width(), height = image.height(), mode = %options.mode, do_crop = options.do_crop)
)]
pub fn process_with_diagnostics(
    image: RgbaImage,
    options: &ScanOptions,
) -> Result<(PipelineResult, PipelineDiagnostics), PipelineError> {
    let mut states = vec![PipelineState::Idle];
    let result = run_stages(image, options, &mut states);
    if let Err(err) = &result {
        let at = states.last().copied().unwrap_or(PipelineState::Idle);
        warn!(state = %at, next = %PipelineState::Failed, error = %err, "scan failed");
    }
    result
}

fn run_stages(
    image: RgbaImage,
    options: &ScanOptions,
    states: &mut Vec<PipelineState>,
) -> Result<(PipelineResult, PipelineDiagnostics), PipelineError> {
    engine::ensure_ready();
    options.criteria.validate()?;
    let input = Dimensions::of(&image);
    if input.width == 0 || input.height == 0 {
        return Err(PipelineError::InvalidDimensions {
            width: input.width,
            height: input.height,
        });
    }

    let total_start = Instant::now();
    let pending = Pipeline::new(image, *options);

    let (rectified, preprocess, detection, rectify) = if options.do_crop {
        states.push(PipelineState::Preprocessing);
        let start = Instant::now();
        let pre = pending.preprocess();
        let preprocess = stage(start, pre.metrics());

        states.push(PipelineState::Detecting);
        let start = Instant::now();
        let detected = pre.detect();
        let detection = stage(start, detected.metrics());
        let found = detected.candidate().is_some();

        let start = Instant::now();
        if found {
            states.push(PipelineState::Rectifying);
        }
        let rectified = detected.rectify()?;
        let rectify = found.then(|| stage(start, rectified.metrics()));
        (rectified, Some(preprocess), Some(detection), rectify)
    } else {
        (pending.skip_crop(), None, None, None)
    };

    states.push(PipelineState::Filtering);
    let start = Instant::now();
    let filtered = rectified.filter();
    let filter = stage(start, filtered.metrics());
    let result = filtered.into_result();
    states.push(PipelineState::Done);

    let diagnostics = PipelineDiagnostics {
        preprocess,
        detection,
        rectify,
        filter,
        states: states.clone(),
        total_duration: total_start.elapsed(),
        summary: PipelineSummary {
            input_width: input.width,
            input_height: input.height,
            output_width: result.image.width(),
            output_height: result.image.height(),
            do_crop: options.do_crop,
            used_fallback: result.used_fallback,
        },
    };
    Ok((result, diagnostics))
}

fn stage(start: Instant, metrics: StageMetrics) -> StageDiagnostics {
    StageDiagnostics {
        duration: start.elapsed(),
        metrics,
    }
}
