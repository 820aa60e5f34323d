//! Grayscale conversion and broadcast.
//!
//! [`to_luma`] reduces an RGBA raster to a single luma channel using the
//! engine's fixed-point Rec. 601 tables. [`broadcast`] goes the other way,
//! writing a luma image back into the R, G and B channels of an RGBA
//! raster while leaving alpha untouched. Every post-filter except
//! identity ends with a broadcast.

use image::{GrayImage, Luma};

use crate::engine::engine;
use crate::types::RgbaImage;

/// Convert an RGBA image to luma: `0.299*R + 0.587*G + 0.114*B`.
///
/// Alpha is ignored.
#[must_use = "returns the luma image"]
pub fn to_luma(image: &RgbaImage) -> GrayImage {
    let engine = engine();
    let mut out = GrayImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        let [r, g, b, _] = src.0;
        *dst = Luma([engine.luma(r, g, b)]);
    }
    out
}

/// Overwrite R, G and B of `image` with the matching luma value.
///
/// Both images must share dimensions; pixels are paired in row-major
/// order.
pub fn broadcast(image: &mut RgbaImage, luma: &GrayImage) {
    debug_assert_eq!(image.dimensions(), luma.dimensions());
    for (dst, src) in image.pixels_mut().zip(luma.pixels()) {
        let v = src.0[0];
        dst.0[0] = v;
        dst.0[1] = v;
        dst.0[2] = v;
    }
}
