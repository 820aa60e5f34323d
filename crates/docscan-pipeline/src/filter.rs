//! Post-filters applied to the rectified (or fallback) image.
//!
//! Every filter keeps the image's dimensions and alpha channel. The
//! non-identity filters all work on luma and write the result back to
//! R, G and B.

use image::{GrayImage, Luma};

use crate::blur::{gaussian_blur, kernel_sigma};
use crate::clahe::clahe;
use crate::grayscale::{broadcast, to_luma};
use crate::types::{ProcessingMode, RgbaImage};

/// Side length of the adaptive threshold's Gaussian neighbourhood.
pub const ADAPTIVE_BLOCK_SIZE: u32 = 25;

/// Amount subtracted from the local mean before thresholding.
pub const ADAPTIVE_OFFSET: i16 = 15;

/// CLAHE contrast limit relative to a flat histogram.
pub const CLAHE_CLIP_LIMIT: f64 = 2.0;

/// CLAHE tiles per side.
pub const CLAHE_GRID: u32 = 8;

/// Apply the post-filter selected by `mode`.
#[must_use = "returns the filtered image"]
pub fn apply_mode(image: RgbaImage, mode: ProcessingMode) -> RgbaImage {
    match mode {
        ProcessingMode::Identity => image,
        ProcessingMode::Grayscale => map_luma(image, |luma| luma),
        ProcessingMode::AdaptiveBinary => map_luma(image, adaptive_threshold),
        ProcessingMode::AutoEnhance => map_luma(image, |luma| {
            clahe(&luma, CLAHE_CLIP_LIMIT, CLAHE_GRID)
        }),
    }
}

/// Convert to luma, transform it, and broadcast back in place.
fn map_luma(mut image: RgbaImage, f: impl FnOnce(GrayImage) -> GrayImage) -> RgbaImage {
    let luma = f(to_luma(&image));
    broadcast(&mut image, &luma);
    image
}

/// Binary threshold against a Gaussian-weighted local mean.
///
/// A pixel becomes white when it is brighter than its neighbourhood mean
/// minus [`ADAPTIVE_OFFSET`], black otherwise. Flat regions therefore
/// turn white and only marks darker than their surroundings stay black.
#[must_use = "returns the binary image"]
pub fn adaptive_threshold(luma: GrayImage) -> GrayImage {
    let mean = gaussian_blur(&luma, kernel_sigma(ADAPTIVE_BLOCK_SIZE));
    let mut out = luma;
    for (px, m) in out.pixels_mut().zip(mean.pixels()) {
        let keep = i16::from(px.0[0]) - i16::from(m.0[0]) > -ADAPTIVE_OFFSET;
        *px = Luma([if keep { 255 } else { 0 }]);
    }
    out
}
