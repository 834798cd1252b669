// SPDX-License-Identifier: GPL-3.0-only

//! Image geometry helpers
//!
//! Bounds-preserving rotation used for per-camera orientation correction,
//! bilinear sampling shared with rectification, and preview scaling.

use image::{Rgb, RgbImage, imageops};

// Keeps exact multiples of 90° from flooring to one pixel short
const BOUNDS_EPSILON: f64 = 1e-6;

/// Size of the canvas that fully contains a `width`×`height` image rotated by
/// `degrees` about its center
pub fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let radians = degrees.to_radians();
    let cos = radians.cos().abs();
    let sin = radians.sin().abs();
    let (w, h) = (width as f64, height as f64);

    let new_width = (h * sin + w * cos + BOUNDS_EPSILON).floor();
    let new_height = (h * cos + w * sin + BOUNDS_EPSILON).floor();
    (new_width as u32, new_height as u32)
}

/// Rotate an image clockwise by `degrees`, growing the canvas to the rotated
/// bounding box
///
/// The source is rotated about its center and re-centered in the new canvas.
/// Pixels not covered by the source are black.
pub fn rotate_bound(image: &RgbImage, degrees: f64) -> RgbImage {
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        return image.clone();
    } else if normalized == 90.0 {
        return imageops::rotate90(image);
    } else if normalized == 180.0 {
        return imageops::rotate180(image);
    } else if normalized == 270.0 {
        return imageops::rotate270(image);
    }

    let (width, height) = image.dimensions();
    let (new_width, new_height) = rotated_bounds(width, height, degrees);

    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    let src_cx = (width as f64 - 1.0) / 2.0;
    let src_cy = (height as f64 - 1.0) / 2.0;
    let dst_cx = (new_width as f64 - 1.0) / 2.0;
    let dst_cy = (new_height as f64 - 1.0) / 2.0;

    // Inverse mapping: rotate each destination pixel back into the source
    RgbImage::from_fn(new_width, new_height, |x, y| {
        let dx = x as f64 - dst_cx;
        let dy = y as f64 - dst_cy;
        let sx = cos * dx + sin * dy + src_cx;
        let sy = -sin * dx + cos * dy + src_cy;
        sample_bilinear(image, sx, sy)
    })
}

/// Sample `image` at a sub-pixel position, blending with black outside
pub(crate) fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    if !x.is_finite() || !y.is_finite() || x <= -1.0 || y <= -1.0 {
        return Rgb([0, 0, 0]);
    }
    if x >= width as f64 || y >= height as f64 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let fetch = |px: i64, py: i64| -> [f64; 3] {
        if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
            [0.0; 3]
        } else {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f64, p[1] as f64, p[2] as f64]
        }
    };

    let top_left = fetch(x0, y0);
    let top_right = fetch(x0 + 1, y0);
    let bottom_left = fetch(x0, y0 + 1);
    let bottom_right = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = top_left[c] * (1.0 - fx) + top_right[c] * fx;
        let bottom = bottom_left[c] * (1.0 - fx) + bottom_right[c] * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Resize an image to `percent` of its size for display
pub fn scale_image(image: &RgbImage, percent: u32) -> RgbImage {
    if percent == 100 {
        return image.clone();
    }
    let factor = percent as f64 / 100.0;
    let width = ((image.width() as f64 * factor).round() as u32).max(1);
    let height = ((image.height() as f64 * factor).round() as u32).max(1);
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_known_angles() {
        assert_eq!(rotated_bounds(640, 480, 0.0), (640, 480));
        assert_eq!(rotated_bounds(640, 480, 30.0), (794, 735));
        assert_eq!(rotated_bounds(640, 480, 45.0), (791, 791));
        assert_eq!(rotated_bounds(640, 480, 90.0), (480, 640));
        assert_eq!(rotated_bounds(640, 480, 135.0), (791, 791));
        assert_eq!(rotated_bounds(640, 480, 200.0), (765, 669));
    }

    #[test]
    fn test_negative_angle_same_bounds() {
        assert_eq!(rotated_bounds(640, 480, -30.0), rotated_bounds(640, 480, 30.0));
    }

    #[test]
    fn test_quarter_turn_is_clockwise() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));

        let rotated = rotate_bound(&image, 90.0);
        assert_eq!(rotated.dimensions(), (2, 3));
        // Top-left corner moves to the top-right
        assert_eq!(rotated.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_arbitrary_angle_keeps_center() {
        let image = RgbImage::from_pixel(41, 21, Rgb([200, 100, 50]));
        let rotated = rotate_bound(&image, 30.0);

        let (w, h) = rotated.dimensions();
        assert_eq!((w, h), rotated_bounds(41, 21, 30.0));
        assert_eq!(rotated.get_pixel(w / 2, h / 2).0, [200, 100, 50]);
        // Corners of the expanded canvas are outside the source
        assert_eq!(rotated.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_scale_image() {
        let image = RgbImage::new(100, 50);
        assert_eq!(scale_image(&image, 80).dimensions(), (80, 40));
        assert_eq!(scale_image(&image, 100).dimensions(), (100, 50));
    }
}
