//! Gaussian blur for noise reduction and local-mean estimation.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. Callers think in terms
//! of square kernel sizes (5x5 before edge detection, 25x25 for the
//! adaptive threshold's neighbourhood), so [`kernel_sigma`] converts a
//! kernel size into the standard deviation such a kernel implies.

use image::GrayImage;

/// Standard deviation implied by an odd `ksize x ksize` Gaussian kernel
/// when no sigma is given: `0.3 * ((ksize - 1) * 0.5 - 1) + 0.8`.
///
/// A 5x5 kernel gives 1.1, a 25x25 kernel gives 4.1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn kernel_sigma(ksize: u32) -> f32 {
    0.3f32.mul_add((ksize as f32 - 1.0).mul_add(0.5, -1.0), 0.8)
}

/// Apply Gaussian blur to a grayscale image.
///
/// Higher `sigma` values produce more smoothing. Non-positive sigma values
/// (zero or negative) return the image unchanged, since `imageproc`'s
/// underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn kernel_sigma_matches_known_sizes() {
        assert!((kernel_sigma(5) - 1.1).abs() < 1e-6);
        assert!((kernel_sigma(25) - 4.1).abs() < 1e-5);
        assert!((kernel_sigma(3) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 0.0);
        assert_eq!(img, blurred);
    }

    #[test]
    fn negative_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, -1.0);
        assert_eq!(img, blurred);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, kernel_sigma(5));
        assert_eq!(blurred.width(), 17);
        assert_eq!(blurred.height(), 31);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 2.0);

        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];

        assert!(
            left_of_edge > 0,
            "expected blur to raise left-of-edge above 0, got {left_of_edge}",
        );
        assert!(
            right_of_edge < 255,
            "expected blur to lower right-of-edge below 255, got {right_of_edge}",
        );
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_fn(30, 30, |_, _| image::Luma([128]));
        let blurred = gaussian_blur(&img, kernel_sigma(25));
        for pixel in blurred.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(
                diff.abs() <= 1,
                "expected uniform image to stay near 128 after blur, got {}",
                pixel.0[0],
            );
        }
    }
}
