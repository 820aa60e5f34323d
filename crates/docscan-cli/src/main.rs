//! docscan: scan a photographed document from the command line.
//!
//! Decodes an image, finds and flattens the page, applies a post-filter,
//! and prints per-stage diagnostics. Useful for:
//!
//! - Producing a cleaned-up PNG from a phone photo
//! - Tuning the page-detection criteria on problem images
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin docscan -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`).

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use docscan_pipeline::raster::{DEFAULT_MAX_DIMENSION, decode, scale_to_max};
use docscan_pipeline::{PipelineDiagnostics, ProcessingMode, QuadCriteria, ScanOptions};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Detect, flatten, and clean up a photographed document.
///
/// Runs the scan pipeline on a given image and prints per-stage timing
/// and count diagnostics. Pass `--output` to save the result as PNG.
#[derive(Parser)]
#[command(name = "docscan", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Write the scanned page to this PNG file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Post-filter applied to the page.
    #[arg(long, value_enum, default_value_t = Mode::Original)]
    mode: Mode,

    /// Keep the full frame instead of detecting the page.
    #[arg(long)]
    no_crop: bool,

    /// Smallest page area accepted, as a fraction of the image (0.0-1.0).
    #[arg(long, default_value_t = QuadCriteria::DEFAULT_MIN_AREA_RATIO)]
    min_area_ratio: f64,

    /// Smallest accepted page width/height ratio.
    #[arg(long, default_value_t = QuadCriteria::DEFAULT_ASPECT_MIN)]
    aspect_min: f64,

    /// Largest accepted page width/height ratio.
    #[arg(long, default_value_t = QuadCriteria::DEFAULT_ASPECT_MAX)]
    aspect_max: f64,

    /// Downscale so the longer side is at most this many pixels (0 disables).
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,
}

/// Post-filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Leave the pixels as they are.
    Original,
    /// Luma grayscale.
    Gray,
    /// Black text on white via adaptive thresholding.
    Bw,
    /// Local contrast enhancement (CLAHE).
    Auto,
}

impl From<Mode> for ProcessingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Original => Self::Identity,
            Mode::Gray => Self::Grayscale,
            Mode::Bw => Self::AdaptiveBinary,
            Mode::Auto => Self::AutoEnhance,
        }
    }
}

/// Build [`ScanOptions`] from CLI arguments.
fn options_from_cli(cli: &Cli) -> Result<ScanOptions, String> {
    let criteria = QuadCriteria {
        min_area_ratio: cli.min_area_ratio,
        aspect_min: cli.aspect_min,
        aspect_max: cli.aspect_max,
    };
    criteria.validate().map_err(|e| e.to_string())?;
    Ok(ScanOptions {
        criteria,
        ..ScanOptions::new(cli.mode.into(), !cli.no_crop)
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let options = match options_from_cli(&cli) {
        Ok(o) => o,
        Err(msg) => {
            error!("invalid options: {msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let image = match decode(&image_bytes) {
        Ok(image) => scale_to_max(image, cli.max_dimension),
        Err(e) => {
            error!("error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    info!(
        path = %cli.image_path.display(),
        bytes = image_bytes.len(),
        width = image.width(),
        height = image.height(),
        mode = %options.mode,
        do_crop = options.do_crop,
        runs = cli.runs,
        "loaded image"
    );

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match docscan_pipeline::process_with_diagnostics(image.clone(), &options) {
            Ok((result, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            error!("error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write the page on the first run only.
                if run == 0
                    && let Some(ref path) = cli.output
                {
                    match result.image.save_with_format(path, image::ImageFormat::Png) {
                        Ok(()) => info!(
                            path = %path.display(),
                            width = result.image.width(),
                            height = result.image.height(),
                            "scan written"
                        ),
                        Err(e) => {
                            error!("error writing {}: {e}", path.display());
                            return ExitCode::FAILURE;
                        }
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                error!(kind = ?e.kind(), "pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<std::time::Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Preprocess", |d| d.preprocess.as_ref().map(|s| s.duration)),
        ("Detection", |d| d.detection.as_ref().map(|s| s.duration)),
        ("Rectify", |d| d.rectify.as_ref().map(|s| s.duration)),
        ("Filter", |d| Some(d.filter.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
