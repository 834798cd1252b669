// SPDX-License-Identifier: GPL-3.0-only
//! Still-image capture device
//!
//! Serves the same decoded image on every read. Used to replay recorded
//! pairs offline and to drive the worker without hardware.

use super::CaptureDevice;
use super::types::CameraControl;
use crate::errors::{StereoError, StereoResult};
use image::RgbImage;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// File extensions treated as still images rather than device nodes
const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "ppm"];

/// True if `identifier` names an image file by extension
pub fn is_image_path(identifier: &str) -> bool {
    Path::new(identifier)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Decode an image from disk into RGB
pub fn load_image(path: &Path) -> StereoResult<RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| StereoError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Capture device backed by a single image
pub struct StillImageDevice {
    name: String,
    frame: Option<RgbImage>,
    controls: HashMap<CameraControl, f64>,
}

impl StillImageDevice {
    /// Open an image file as a device
    pub fn open(path: &str) -> StereoResult<Self> {
        let frame = load_image(Path::new(path)).map_err(|e| StereoError::DeviceOpen {
            device: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_image(path, frame))
    }

    /// Wrap an in-memory frame
    pub fn from_image(name: &str, frame: RgbImage) -> Self {
        Self {
            name: name.to_string(),
            frame: Some(frame),
            controls: HashMap::new(),
        }
    }
}

impl CaptureDevice for StillImageDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> StereoResult<RgbImage> {
        self.frame.clone().ok_or_else(|| {
            StereoError::FrameAcquisition(format!("{} has been released", self.name))
        })
    }

    fn set_control(&mut self, control: CameraControl, value: f64) -> StereoResult<()> {
        self.controls.insert(control, value);
        Ok(())
    }

    fn control(&self, control: CameraControl) -> Option<f64> {
        self.controls.get(&control).copied()
    }

    fn release(&mut self) {
        if self.frame.take().is_some() {
            debug!(name = %self.name, "Released still image device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_path_detection() {
        assert!(is_image_path("pair/left.png"));
        assert!(is_image_path("LEFT.JPG"));
        assert!(!is_image_path("/dev/video0"));
        assert!(!is_image_path("2"));
    }

    #[test]
    fn test_read_after_release_fails() {
        let mut device = StillImageDevice::from_image("mem", RgbImage::new(4, 2));
        assert_eq!(device.read_frame().unwrap().dimensions(), (4, 2));

        device.release();
        assert!(device.read_frame().unwrap_err().is_transient());
    }

    #[test]
    fn test_controls_are_remembered() {
        let mut device = StillImageDevice::from_image("mem", RgbImage::new(1, 1));
        assert_eq!(device.control(CameraControl::Gain), None);
        device.set_control(CameraControl::Gain, 3.0).unwrap();
        assert_eq!(device.control(CameraControl::Gain), Some(3.0));
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let err = StillImageDevice::open("/nonexistent/left.png").err().unwrap();
        assert!(matches!(err, StereoError::DeviceOpen { .. }));
    }
}
