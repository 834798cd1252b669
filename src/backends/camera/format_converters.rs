// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion for raw V4L2 buffers
//!
//! Every frame leaving a capture device is an 8-bit RGB image, so the
//! rest of the pipeline never deals with device pixel formats.

use crate::errors::{StereoError, StereoResult};
use image::RgbImage;

/// Packed 4:2:2 byte orders handled by [`packed_yuv422_to_rgb`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yuv422Order {
    /// Y0 U Y1 V
    Yuyv,
    /// U Y0 V Y1
    Uyvy,
}

/// Convert a packed YUV 4:2:2 buffer to RGB (BT.601)
///
/// Each 4-byte group encodes 2 pixels sharing one chroma sample.
pub fn packed_yuv422_to_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    order: Yuv422Order,
) -> StereoResult<RgbImage> {
    let pixel_count = (width as usize) * (height as usize);
    if width % 2 != 0 || data.len() < pixel_count * 2 {
        return Err(StereoError::FrameAcquisition(format!(
            "YUV 4:2:2 buffer of {} bytes does not hold a {}x{} frame",
            data.len(),
            width,
            height
        )));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for chunk in data[..pixel_count * 2].chunks_exact(4) {
        let (y0, u, y1, v) = match order {
            Yuv422Order::Yuyv => (chunk[0], chunk[1], chunk[2], chunk[3]),
            Yuv422Order::Uyvy => (chunk[1], chunk[0], chunk[3], chunk[2]),
        };
        for luma in [y0, y1] {
            let (r, g, b) = yuv_to_rgb(luma, u, v);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| StereoError::FrameAcquisition("YUV conversion size mismatch".into()))
}

/// Decode an MJPEG buffer into an RGB frame
pub fn mjpeg_to_rgb(data: &[u8]) -> StereoResult<RgbImage> {
    image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| StereoError::FrameAcquisition(format!("MJPEG decode failed: {}", e)))
}

/// Expand an 8-bit grayscale buffer to RGB
pub fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> StereoResult<RgbImage> {
    let pixel_count = (width as usize) * (height as usize);
    if data.len() < pixel_count {
        return Err(StereoError::FrameAcquisition(format!(
            "GREY buffer of {} bytes does not hold a {}x{} frame",
            data.len(),
            width,
            height
        )));
    }

    let rgb = data[..pixel_count].iter().flat_map(|&v| [v, v, v]).collect();
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| StereoError::FrameAcquisition("GREY conversion size mismatch".into()))
}

/// Convert YUV (BT.601) to RGB
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;

    (r, g, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // Two pixels, luma 50 and 200, neutral chroma
        let data = [50u8, 128, 200, 128];
        let rgb = packed_yuv422_to_rgb(&data, 2, 1, Yuv422Order::Yuyv).unwrap();

        assert_eq!(rgb.get_pixel(0, 0).0, [50, 50, 50]);
        assert_eq!(rgb.get_pixel(1, 0).0, [200, 200, 200]);
    }

    #[test]
    fn test_uyvy_byte_order() {
        let data = [128u8, 10, 128, 20];
        let rgb = packed_yuv422_to_rgb(&data, 2, 1, Yuv422Order::Uyvy).unwrap();

        assert_eq!(rgb.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [20, 20, 20]);
    }

    #[test]
    fn test_short_buffer_is_acquisition_error() {
        let err = packed_yuv422_to_rgb(&[0u8; 6], 2, 2, Yuv422Order::Yuyv).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_gray_to_rgb() {
        let rgb = gray_to_rgb(&[0, 255], 2, 1).unwrap();
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 255, 255]);
    }
}
