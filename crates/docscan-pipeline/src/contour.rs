//! Contour extraction: trace closed boundaries in a binary edge map.
//!
//! Uses Suzuki-Abe border following via
//! [`imageproc::contours::find_contours`]. Every border is returned as an
//! independent [`Contour`], outer borders and hole borders alike; the
//! parent/child hierarchy is discarded. On 1-pixel-wide Canny edges an
//! outline is typically traced twice (once from each side), which the
//! quadrilateral selector handles naturally since both traces describe
//! the same shape.
//!
//! Output order follows the raster scan that discovers each border, so it
//! is deterministic for a given edge map.

use image::GrayImage;

use crate::types::{Contour, Point};

/// Trace every border in `edges` (nonzero pixels are foreground).
///
/// Returns an empty vector for a map without foreground pixels.
#[must_use = "returns the traced contours"]
pub fn extract_contours(edges: &GrayImage) -> Vec<Contour> {
    let contours: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(edges);

    contours
        .into_iter()
        .filter(|c| !c.points.is_empty())
        .map(|c| {
            let points = c
                .points
                .into_iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect();
            Contour::new(points)
        })
        .collect()
}
