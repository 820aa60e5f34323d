//! Perspective rectification.
//!
//! Maps the ordered document corners onto an axis-aligned `W x H`
//! rectangle. The projective transform from the output rectangle back to
//! the quad comes from [`Projection::from_control_points`], then every
//! output pixel is pulled from the source through it with bilinear
//! interpolation. Source coordinates outside the image read the nearest
//! edge pixel.

use image::Rgba;
use imageproc::geometric_transformations::Projection;
use serde::{Deserialize, Serialize};

use crate::types::{OrderedQuad, PipelineError, Point, RgbaImage};

/// Corner triples whose doubled triangle area falls below this fraction
/// of the squared quad extent count as collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-9;

/// Output geometry for one rectification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Source corners.
    pub quad: OrderedQuad,
    /// Output width: the longer horizontal edge, rounded, at least 1.
    pub dest_width: u32,
    /// Output height: the longer vertical edge, rounded, at least 1.
    pub dest_height: u32,
}

impl TransformSpec {
    /// Derive output dimensions from the quad's edge lengths.
    #[must_use]
    pub fn from_quad(quad: &OrderedQuad) -> Self {
        Self {
            quad: *quad,
            dest_width: round_extent(quad.max_width()),
            dest_height: round_extent(quad.max_height()),
        }
    }

    /// Destination corners in `tl, tr, br, bl` order.
    ///
    /// A one-pixel extent still spans one unit here so the corners stay
    /// distinct. Its single output column or row is then read from the
    /// middle of the quad; see [`Self::sample_point`].
    #[must_use]
    pub fn dest_corners(&self) -> [Point; 4] {
        let right = solve_extent(self.dest_width);
        let bottom = solve_extent(self.dest_height);
        [
            Point::new(0.0, 0.0),
            Point::new(right, 0.0),
            Point::new(right, bottom),
            Point::new(0.0, bottom),
        ]
    }

    /// Coordinate in destination space that output pixel `(x, y)` samples.
    #[must_use]
    pub fn sample_point(&self, x: u32, y: u32) -> Point {
        Point::new(
            sample_coord(x, self.dest_width),
            sample_coord(y, self.dest_height),
        )
    }

    /// The destination-to-source projection for this geometry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DegenerateTransform`] when three corners
    /// are collinear or the control points admit no invertible projection.
    #[allow(clippy::cast_possible_truncation)]
    pub fn inverse_projection(&self) -> Result<Projection, PipelineError> {
        let degenerate = PipelineError::DegenerateTransform(self.quad);
        if has_collinear_corners(&self.quad) {
            return Err(degenerate);
        }
        let to_f32 = |p: Point| (p.x as f32, p.y as f32);
        Projection::from_control_points(
            self.dest_corners().map(to_f32),
            self.quad.corners().map(to_f32),
        )
        .ok_or(degenerate)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_extent(length: f64) -> u32 {
    if length.is_finite() {
        (length.round().clamp(1.0, f64::from(u32::MAX))) as u32
    } else {
        1
    }
}

fn solve_extent(extent: u32) -> f64 {
    f64::from(extent.saturating_sub(1).max(1))
}

fn sample_coord(index: u32, extent: u32) -> f64 {
    if extent == 1 { 0.5 } else { f64::from(index) }
}

/// Whether any three of the four corners lie on one line.
fn has_collinear_corners(quad: &OrderedQuad) -> bool {
    let c = quad.corners();
    let extent = quad.max_width().max(quad.max_height());
    let tolerance = COLLINEAR_TOLERANCE * extent * extent;
    if tolerance.is_nan() || tolerance <= 0.0 {
        return true;
    }
    (0..4).any(|skip| {
        let [a, b, d] = [(skip + 1) % 4, (skip + 2) % 4, (skip + 3) % 4].map(|i| c[i]);
        let cross = (b.x - a.x).mul_add(d.y - a.y, -((b.y - a.y) * (d.x - a.x)));
        cross.abs() <= tolerance
    })
}

/// Warp the quad region of `source` onto an axis-aligned rectangle.
///
/// The output is exactly [`TransformSpec::from_quad`] sized, including
/// quads that round to a single row or column. The source image is
/// consumed; only the output survives.
///
/// # Errors
///
/// Returns [`PipelineError::DegenerateTransform`] when the corners do not
/// determine a projective transform, for example when three of them are
/// collinear, and [`PipelineError::InvalidDimensions`] for an empty source.
#[allow(clippy::cast_possible_truncation)]
pub fn rectify(source: RgbaImage, quad: &OrderedQuad) -> Result<RgbaImage, PipelineError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidDimensions { width, height });
    }
    let target = TransformSpec::from_quad(quad);
    // Destination -> source, so each output pixel is pulled, not pushed.
    let inverse = target.inverse_projection()?;

    let out = RgbaImage::from_fn(target.dest_width, target.dest_height, |x, y| {
        let at = target.sample_point(x, y);
        let (sx, sy) = inverse * (at.x as f32, at.y as f32);
        sample_bilinear(&source, Point::new(f64::from(sx), f64::from(sy)))
    });
    Ok(out)
}

/// Bilinear sample with each tap clamped to the nearest edge pixel.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample_bilinear(image: &RgbaImage, p: Point) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    let max_x = f64::from(w - 1);
    let max_y = f64::from(h - 1);
    // Keep the coordinate in a range where floor/cast are exact; anything
    // beyond one pixel outside clamps to the edge anyway.
    let x = if p.x.is_finite() { p.x.clamp(-1.0, max_x + 1.0) } else { 0.0 };
    let y = if p.y.is_finite() { p.y.clamp(-1.0, max_y + 1.0) } else { 0.0 };

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let clamp_x = |v: f64| v.clamp(0.0, max_x) as u32;
    let clamp_y = |v: f64| v.clamp(0.0, max_y) as u32;
    let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
    let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

    let p00 = image.get_pixel(xa, ya).0;
    let p10 = image.get_pixel(xb, ya).0;
    let p01 = image.get_pixel(xa, yb).0;
    let p11 = image.get_pixel(xb, yb).0;

    Rgba(std::array::from_fn(|c| {
        let top = f64::from(p00[c]).mul_add(1.0 - fx, f64::from(p10[c]) * fx);
        let bottom = f64::from(p01[c]).mul_add(1.0 - fx, f64::from(p11[c]) * fx);
        let v = top.mul_add(1.0 - fy, bottom * fy);
        v.round().clamp(0.0, 255.0) as u8
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use crate::quad::order_quad;

    fn quad(pts: [(f64, f64); 4]) -> OrderedQuad {
        order_quad(pts.map(|(x, y)| Point::new(x, y)))
    }

    /// Every pixel gets a distinct-ish color derived from its position.
    #[allow(clippy::cast_possible_truncation)]
    fn pattern(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    #[test]
    fn transform_rounds_and_floors_extent() {
        let target = TransformSpec::from_quad(&quad([
            (10.0, 10.0),
            (60.4, 10.0),
            (60.4, 50.6),
            (10.0, 50.6),
        ]));
        assert_eq!((target.dest_width, target.dest_height), (50, 41));

        let p = Point::new(3.0, 3.0);
        let collapsed = TransformSpec::from_quad(&OrderedQuad {
            tl: p,
            tr: p,
            br: p,
            bl: p,
        });
        assert_eq!((collapsed.dest_width, collapsed.dest_height), (1, 1));
    }

    #[test]
    fn projection_maps_output_corners_onto_quad() {
        let q = quad([(12.0, 7.0), (140.0, 20.0), (130.0, 90.0), (5.0, 80.0)]);
        let target = TransformSpec::from_quad(&q);
        let inverse = target.inverse_projection().unwrap();
        for (d, s) in target.dest_corners().iter().zip(q.corners()) {
            let (x, y) = inverse * (d.x as f32, d.y as f32);
            let mapped = Point::new(f64::from(x), f64::from(y));
            assert!(mapped.distance(s) < 1e-2, "{d:?} -> {mapped:?}, expected {s:?}");
        }
    }

    #[test]
    fn collinear_corners_are_degenerate() {
        let q = OrderedQuad {
            tl: Point::new(0.0, 0.0),
            tr: Point::new(10.0, 0.0),
            br: Point::new(20.0, 0.0),
            bl: Point::new(0.0, 10.0),
        };
        let err = rectify(pattern(30, 30), &q).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateTransform(_)));
    }

    #[test]
    fn one_pixel_extent_keeps_its_size() {
        let src = pattern(20, 20);

        let narrow = quad([(5.0, 2.0), (6.2, 2.0), (6.2, 12.0), (5.0, 12.0)]);
        let column = rectify(src.clone(), &narrow).unwrap();
        assert_eq!(column.dimensions(), (1, 10));
        // Sampled down the middle at x = 5.6: red is 3 * 5.6 = 16.8.
        assert!(column.pixels().all(|p| p.0[0] == 17), "{column:?}");

        let flat = quad([(3.0, 8.0), (13.0, 8.0), (13.0, 9.2), (3.0, 9.2)]);
        let row = rectify(src, &flat).unwrap();
        assert_eq!(row.dimensions(), (10, 1));
        // Sampled along y = 8.6: green is 5 * 8.6 = 43.
        assert!(row.pixels().all(|p| p.0[1] == 43), "{row:?}");
    }

    #[test]
    fn output_matches_transform_size() {
        let q = quad([(30.0, 20.0), (170.0, 25.0), (160.0, 120.0), (35.0, 115.0)]);
        let target = TransformSpec::from_quad(&q);
        let out = rectify(pattern(200, 140), &q).unwrap();
        assert_eq!(out.dimensions(), (target.dest_width, target.dest_height));
    }

    #[test]
    fn corners_sample_source_corners() {
        let src = pattern(200, 140);
        let q = quad([(30.0, 20.0), (170.0, 20.0), (170.0, 120.0), (30.0, 120.0)]);
        let out = rectify(src.clone(), &q).unwrap();
        let (w, h) = out.dimensions();
        assert_eq!((w, h), (140, 100));
        assert_eq!(out.get_pixel(0, 0), src.get_pixel(30, 20));
        assert_eq!(out.get_pixel(w - 1, 0), src.get_pixel(170, 20));
        assert_eq!(out.get_pixel(w - 1, h - 1), src.get_pixel(170, 120));
        assert_eq!(out.get_pixel(0, h - 1), src.get_pixel(30, 120));
    }

    #[test]
    fn uniform_source_stays_uniform() {
        let src = RgbaImage::from_pixel(80, 60, Rgba([10, 120, 230, 200]));
        let q = quad([(5.0, 3.0), (70.0, 10.0), (75.0, 55.0), (2.0, 50.0)]);
        let out = rectify(src, &q).unwrap();
        assert!(out.pixels().all(|p| p.0 == [10, 120, 230, 200]));
    }

    #[test]
    fn corners_outside_image_replicate_edges() {
        let src = RgbaImage::from_fn(20, 20, |x, _| {
            if x < 10 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        let q = quad([(-10.0, -10.0), (30.0, -10.0), (30.0, 30.0), (-10.0, 30.0)]);
        let out = rectify(src, &q).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0, 255]);
        let (w, h) = out.dimensions();
        assert_eq!(out.get_pixel(w - 1, h - 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn collapsed_quad_is_processing_error() {
        let p = Point::new(4.0, 4.0);
        let q = OrderedQuad {
            tl: p,
            tr: p,
            br: p,
            bl: p,
        };
        let err = rectify(pattern(10, 10), &q).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateTransform(_)));
    }
}
