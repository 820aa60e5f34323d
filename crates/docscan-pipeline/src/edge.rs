//! Edge preprocessing: luma, Gaussian smoothing, and Canny detection.
//!
//! [`preprocess`] is the first pipeline stage. It turns an RGBA raster
//! into a binary edge map (255 = edge, 0 = background) of the same size.
//!
//! The Canny implementation here differs from `imageproc::edges::canny`
//! in three ways: it does not blur internally (the caller controls the
//! smoothing kernel), it uses the L1 gradient magnitude `|gx| + |gy|`,
//! and its hysteresis walks all eight neighbours with bounds checks so
//! edges touching the image border never index out of range.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::filter_clamped;
use imageproc::kernel;

use crate::blur::{gaussian_blur, kernel_sigma};
use crate::grayscale::to_luma;
use crate::types::RgbaImage;

/// Side length of the square smoothing kernel applied before Canny.
pub const PREPROCESS_KERNEL_SIZE: u32 = 5;

/// Canny low (weak edge) threshold on the L1 gradient magnitude.
pub const CANNY_LOW: f32 = 60.0;

/// Canny high (strong edge) threshold on the L1 gradient magnitude.
pub const CANNY_HIGH: f32 = 180.0;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero causes every pixel with any gradient to be
/// treated as a potential edge, producing an extremely dense edge map
/// that overwhelms contour extraction.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Value written for edge pixels.
pub const EDGE: u8 = 255;

/// tan(22.5°), boundary between horizontal and diagonal gradient sectors.
const TAN_22_5: f32 = 0.414_213_56;

/// tan(67.5°), boundary between diagonal and vertical gradient sectors.
const TAN_67_5: f32 = 2.414_213_6;

const NONE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

/// RGBA raster to binary edge map: luma, 5x5 Gaussian, Canny 60/180.
///
/// Total for any non-empty image. A uniform image yields an all-zero map.
#[must_use = "returns the binary edge map"]
pub fn preprocess(image: &RgbaImage) -> GrayImage {
    let gray = to_luma(image);
    let smooth = gaussian_blur(&gray, kernel_sigma(PREPROCESS_KERNEL_SIZE));
    canny(&smooth, CANNY_LOW, CANNY_HIGH)
}

/// Detect edges using the Canny algorithm on an already-smoothed image.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge.
///
/// Gradient magnitude is `|gx| + |gy|` from 3x3 Sobel kernels with
/// replicated borders. After non-maximum suppression, pixels strictly
/// above `high_threshold` seed edges and pixels strictly above
/// `low_threshold` join an edge when 8-connected to a seed.
///
/// Both thresholds are clamped to a minimum of [`MIN_THRESHOLD`] and
/// `low_threshold` is clamped to be at most `high_threshold`.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);

    let (width, height) = image.dimensions();
    let gx: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);

    let magnitude: Vec<f32> = gx
        .as_raw()
        .iter()
        .zip(gy.as_raw())
        .map(|(&h, &v)| f32::from(h.unsigned_abs()) + f32::from(v.unsigned_abs()))
        .collect();

    let grid = Grid {
        width: width as usize,
        height: height as usize,
    };
    let classes = suppress_non_maxima(&grid, &magnitude, gx.as_raw(), gy.as_raw(), low, high);
    let raw = hysteresis(&grid, &classes);

    GrayImage::from_raw(width, height, raw).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Row-major index helper with bounds-checked neighbour lookup.
struct Grid {
    width: usize,
    height: usize,
}

impl Grid {
    const fn len(&self) -> usize {
        self.width * self.height
    }

    /// Index of `(x + dx, y + dy)`, or `None` outside the image.
    fn offset(&self, x: usize, y: usize, dx: isize, dy: isize) -> Option<usize> {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < self.width && ny < self.height).then_some(ny * self.width + nx)
    }
}

/// Classify every pixel as none, weak or strong.
///
/// A pixel survives only if its magnitude is a local maximum along the
/// quantized gradient direction. Ties keep the pixel on the lower-index
/// side for horizontal and vertical gradients so a two-pixel plateau
/// thins to one. Neighbours outside the image count as zero.
fn suppress_non_maxima(
    grid: &Grid,
    magnitude: &[f32],
    gx: &[i16],
    gy: &[i16],
    low: f32,
    high: f32,
) -> Vec<u8> {
    let mut classes = vec![NONE; grid.len()];
    let sample =
        |x, y, dx, dy| grid.offset(x, y, dx, dy).map_or(0.0, |i: usize| magnitude[i]);

    for y in 0..grid.height {
        for x in 0..grid.width {
            let i = y * grid.width + x;
            let m = magnitude[i];
            if m <= low {
                continue;
            }
            let (sx, sy) = (gx[i], gy[i]);
            let ax = f32::from(sx.unsigned_abs());
            let ay = f32::from(sy.unsigned_abs());

            let is_max = if ay < ax * TAN_22_5 {
                m > sample(x, y, -1, 0) && m >= sample(x, y, 1, 0)
            } else if ay > ax * TAN_67_5 {
                m > sample(x, y, 0, -1) && m >= sample(x, y, 0, 1)
            } else {
                let s: isize = if (sx < 0) == (sy < 0) { 1 } else { -1 };
                m > sample(x, y, -s, -1) && m > sample(x, y, s, 1)
            };

            if is_max {
                classes[i] = if m > high { STRONG } else { WEAK };
            }
        }
    }
    classes
}

/// Grow strong seeds through 8-connected weak pixels.
fn hysteresis(grid: &Grid, classes: &[u8]) -> Vec<u8> {
    const NEIGHBOURS: [(isize, isize); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    let mut out = vec![0_u8; grid.len()];
    let mut stack = Vec::new();

    for (i, &class) in classes.iter().enumerate() {
        if class != STRONG || out[i] == EDGE {
            continue;
        }
        out[i] = EDGE;
        stack.push(i);
        while let Some(j) = stack.pop() {
            let (x, y) = (j % grid.width, j / grid.width);
            for (dx, dy) in NEIGHBOURS {
                if let Some(n) = grid.offset(x, y, dx, dy) {
                    if classes[n] != NONE && out[n] != EDGE {
                        out[n] = EDGE;
                        stack.push(n);
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    fn edge_count(edges: &GrayImage) -> u32 {
        edges.pixels().map(|p| u32::from(p.0[0] > 0)).sum()
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_fn(20, 20, |_, _| image::Luma([128]));
        let edges = canny(&img, CANNY_LOW, CANNY_HIGH);
        assert_eq!(edges.dimensions(), (20, 20));
        assert_eq!(edge_count(&edges), 0, "expected no edges in uniform image");
    }

    #[test]
    fn step_edge_thins_to_one_column() {
        let edges = canny(&sharp_edge_image(), CANNY_LOW, CANNY_HIGH);
        for y in 0..20 {
            for x in 0..20 {
                let expected = if x == 9 { EDGE } else { 0 };
                assert_eq!(
                    edges.get_pixel(x, y).0[0],
                    expected,
                    "unexpected edge value at ({x}, {y})",
                );
            }
        }
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn output_is_binary() {
        let img = GrayImage::from_fn(32, 32, |x, y| image::Luma([((x * 7 + y * 13) % 256) as u8]));
        let edges = canny(&img, 10.0, 40.0);
        assert!(edges.pixels().all(|p| p.0[0] == 0 || p.0[0] == EDGE));
    }

    #[test]
    fn border_edge_does_not_panic() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([0]));
        for y in 0..10 {
            img.put_pixel(1, y, Luma([255]));
        }
        let edges = canny(&img, 1.0, 2.0);
        assert!(edge_count(&edges) > 0);
    }

    #[test]
    fn tiny_images_are_handled() {
        for (w, h) in [(1, 1), (1, 5), (2, 2)] {
            let img = GrayImage::from_pixel(w, h, Luma([200]));
            let edges = canny(&img, CANNY_LOW, CANNY_HIGH);
            assert_eq!(edges.dimensions(), (w, h));
        }
    }

    #[test]
    fn weak_edges_need_a_strong_neighbour() {
        // A faint step (magnitude 4 * 20 = 80) sits between the thresholds
        // and has no strong seed, so nothing survives.
        let img = GrayImage::from_fn(20, 20, |x, _| Luma([if x < 10 { 100 } else { 120 }]));
        assert_eq!(edge_count(&canny(&img, CANNY_LOW, CANNY_HIGH)), 0);
    }

    #[test]
    fn thresholds_are_clamped() {
        // low > high and zero thresholds must not panic or flood the map.
        let img = sharp_edge_image();
        let swapped = canny(&img, 500.0, 100.0);
        assert!(edge_count(&swapped) > 0);
        let zero = canny(&GrayImage::from_pixel(8, 8, Luma([50])), 0.0, 0.0);
        assert_eq!(edge_count(&zero), 0);
    }

    #[test]
    fn preprocess_uniform_rgba_has_no_edges() {
        let img = RgbaImage::from_pixel(40, 30, image::Rgba([90, 120, 30, 255]));
        let edges = preprocess(&img);
        assert_eq!(edges.dimensions(), (40, 30));
        assert_eq!(edge_count(&edges), 0);
    }

    #[test]
    fn preprocess_finds_rectangle_outline() {
        let img = RgbaImage::from_fn(60, 60, |x, y| {
            if (15..45).contains(&x) && (15..45).contains(&y) {
                image::Rgba([240, 240, 240, 255])
            } else {
                image::Rgba([20, 20, 20, 255])
            }
        });
        let edges = preprocess(&img);
        assert!(edge_count(&edges) > 60, "expected an outline of edge pixels");
        // The interior of the bright square and far background stay clear.
        assert_eq!(edges.get_pixel(30, 30).0[0], 0);
        assert_eq!(edges.get_pixel(2, 2).0[0], 0);
    }
}
