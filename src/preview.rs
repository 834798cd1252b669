// SPDX-License-Identifier: GPL-3.0-only

//! Live preview output
//!
//! The worker hands every acquired pair to a [`PreviewSink`]. Sinks must
//! return quickly; the terminal front end only stores the latest pair.

use crate::backends::camera::FramePair;
use crate::pipelines::geometry::scale_image;

/// Destination for live frames
pub trait PreviewSink: Send {
    /// Display a pair scaled to `scale` percent
    fn show(&mut self, pair: &FramePair, scale: u32);

    /// Tear down any open surface; called once at shutdown
    fn close(&mut self) {}
}

/// Sink that discards frames (headless runs)
#[derive(Debug, Default)]
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show(&mut self, _pair: &FramePair, _scale: u32) {}
}

/// Scale both sides of a pair for display
pub fn scale_pair(pair: &FramePair, scale: u32) -> FramePair {
    FramePair {
        left: scale_image(&pair.left, scale),
        right: scale_image(&pair.right, scale),
        captured_at: pair.captured_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_scale_pair_keeps_instant() {
        let pair = FramePair::new(RgbImage::new(10, 10), RgbImage::new(20, 10));
        let scaled = scale_pair(&pair, 50);
        assert_eq!(scaled.left.dimensions(), (5, 5));
        assert_eq!(scaled.right.dimensions(), (10, 5));
        assert_eq!(scaled.captured_at, pair.captured_at);
    }
}
