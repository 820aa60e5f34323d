//! Raster construction, decoding, and input downscaling.
//!
//! Everything downstream works on an owned [`RgbaImage`]. This module is
//! the only place raw bytes turn into one: either a bare RGBA buffer with
//! declared dimensions (the worker protocol) or an encoded file (the CLI).

use image::imageops::FilterType;

use crate::types::{PipelineError, RgbaImage};

/// Longest side accepted by [`scale_to_max`] callers by default.
pub const DEFAULT_MAX_DIMENSION: u32 = 1600;

/// Wrap a raw RGBA buffer without copying it.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidDimensions`] if either dimension is
/// zero or `width * height * 4` overflows, [`PipelineError::EmptyInput`]
/// if `buffer` is empty, and [`PipelineError::BufferSizeMismatch`] if the
/// buffer length is not exactly `width * height * 4`.
pub fn from_parts(width: u32, height: u32, buffer: Vec<u8>) -> Result<RgbaImage, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions { width, height });
    }
    if buffer.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let expected = usize::try_from(width)
        .ok()
        .zip(usize::try_from(height).ok())
        .and_then(|(w, h)| w.checked_mul(h))
        .and_then(|n| n.checked_mul(4))
        .ok_or(PipelineError::InvalidDimensions { width, height })?;
    if buffer.len() != expected {
        return Err(PipelineError::BufferSizeMismatch {
            width,
            height,
            expected,
            actual: buffer.len(),
        });
    }
    RgbaImage::from_raw(width, height, buffer).ok_or(PipelineError::BufferSizeMismatch {
        width,
        height,
        expected,
        actual: 0,
    })
}

/// Decode an encoded image file (PNG, JPEG, BMP, WebP) into RGBA.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty and
/// [`PipelineError::ImageDecode`] if the format is unrecognized or the
/// data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Shrink `image` so its longer side is at most `max_dim`, keeping the
/// aspect ratio. Images already within bounds are returned untouched.
///
/// A `max_dim` of zero disables scaling.
#[must_use = "returns the possibly downscaled image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn scale_to_max(image: RgbaImage, max_dim: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if max_dim == 0 || longest <= max_dim {
        return image;
    }
    let scale = f64::from(max_dim) / f64::from(longest);
    let new_w = ((f64::from(w) * scale).round() as u32).max(1);
    let new_h = ((f64::from(h) * scale).round() as u32).max(1);
    image::imageops::resize(&image, new_w, new_h, FilterType::Triangle)
}
