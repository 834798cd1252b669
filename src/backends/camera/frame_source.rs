// SPDX-License-Identifier: GPL-3.0-only
//! Stereo frame sources
//!
//! A frame source turns one or two capture devices into a logical left/right
//! pair. The strategy is picked once from [`StereoDeviceConfig`]:
//!
//! - [`DualDeviceSource`]: one device per camera
//! - [`SplitFrameSource`]: one side-by-side device, each frame cut in half
//!
//! Both apply the per-camera rotation from [`CameraControls`] to each side
//! independently after acquisition.

use super::CaptureDevice;
use super::types::{CameraControls, CameraSide, FramePair, StereoDeviceConfig};
use crate::errors::{StereoError, StereoResult};
use crate::pipelines::geometry::rotate_bound;
use image::{RgbImage, imageops};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens a capture device from its identifier
pub type DeviceOpener<'a> = dyn FnMut(&str) -> StereoResult<Box<dyn CaptureDevice>> + 'a;

/// Source of synchronized stereo pairs
pub trait FrameSource: Send {
    /// Block until one frame per camera is available and return the pair
    fn get_frames(&mut self) -> StereoResult<FramePair>;

    /// Per-camera state shared with the front end
    fn controls(&self) -> &Arc<CameraControls>;

    /// Free the underlying devices; calling it again is a no-op
    fn release(&mut self);

    /// True when both cameras come from one device
    fn is_split_frame(&self) -> bool;

    /// Set one camera's rotation, applied from the next pair
    fn set_rotation(&self, side: CameraSide, degrees: f64) {
        self.controls().set_rotation(side, degrees);
    }
}

/// Split a side-by-side frame into (left, right) halves
///
/// The left half gets the floor of half the width, the right half the rest.
pub fn split_frame(frame: &RgbImage) -> (RgbImage, RgbImage) {
    let (width, height) = frame.dimensions();
    let left_width = width / 2;
    let left = imageops::crop_imm(frame, 0, 0, left_width, height).to_image();
    let right = imageops::crop_imm(frame, left_width, 0, width - left_width, height).to_image();
    (left, right)
}

/// Apply each camera's current rotation to its own frame
fn apply_rotation(controls: &CameraControls, pair: FramePair) -> FramePair {
    pair.map(|side, frame| {
        let degrees = controls.rotation(side);
        if degrees == 0.0 {
            frame
        } else {
            rotate_bound(&frame, degrees)
        }
    })
}

/// Push changed controls of `side` to `device`
fn push_pending_controls(
    controls: &CameraControls,
    side: CameraSide,
    device: &mut dyn CaptureDevice,
) {
    let Some(state) = controls.take_pending(side) else {
        return;
    };
    for (control, value) in state.set_controls() {
        if let Err(e) = device.set_control(control, value) {
            warn!(%side, control = control.display_name(), error = %e, "Failed to apply camera control");
        }
    }
}

fn released_error() -> StereoError {
    StereoError::FrameAcquisition("frame source has been released".into())
}

/// Two physical devices, one per camera
pub struct DualDeviceSource {
    devices: Option<[Box<dyn CaptureDevice>; 2]>,
    controls: Arc<CameraControls>,
}

impl DualDeviceSource {
    pub fn new(
        left: Box<dyn CaptureDevice>,
        right: Box<dyn CaptureDevice>,
        controls: Arc<CameraControls>,
    ) -> Self {
        Self {
            devices: Some([left, right]),
            controls,
        }
    }
}

impl FrameSource for DualDeviceSource {
    fn get_frames(&mut self) -> StereoResult<FramePair> {
        let [left, right] = self.devices.as_mut().ok_or_else(released_error)?;

        push_pending_controls(&self.controls, CameraSide::Left, &mut **left);
        push_pending_controls(&self.controls, CameraSide::Right, &mut **right);

        let left_frame = left.read_frame()?;
        let right_frame = right.read_frame()?;
        Ok(apply_rotation(
            &self.controls,
            FramePair::new(left_frame, right_frame),
        ))
    }

    fn controls(&self) -> &Arc<CameraControls> {
        &self.controls
    }

    fn release(&mut self) {
        if let Some(mut devices) = self.devices.take() {
            for device in devices.iter_mut() {
                device.release();
            }
            info!("Released dual-device stereo source");
        }
    }

    fn is_split_frame(&self) -> bool {
        false
    }
}

impl Drop for DualDeviceSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// One physical device delivering both views side by side
pub struct SplitFrameSource {
    device: Option<Box<dyn CaptureDevice>>,
    controls: Arc<CameraControls>,
}

impl SplitFrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, controls: Arc<CameraControls>) -> Self {
        Self {
            device: Some(device),
            controls,
        }
    }
}

impl FrameSource for SplitFrameSource {
    fn get_frames(&mut self) -> StereoResult<FramePair> {
        let device = self.device.as_mut().ok_or_else(released_error)?;

        // Both cameras map onto the same device; right is applied last
        push_pending_controls(&self.controls, CameraSide::Left, &mut **device);
        push_pending_controls(&self.controls, CameraSide::Right, &mut **device);

        let frame = device.read_frame()?;
        let (left, right) = split_frame(&frame);
        Ok(apply_rotation(&self.controls, FramePair::new(left, right)))
    }

    fn controls(&self) -> &Arc<CameraControls> {
        &self.controls
    }

    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            info!("Released split-frame stereo source");
        }
    }

    fn is_split_frame(&self) -> bool {
        true
    }
}

impl Drop for SplitFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open the devices named in `config` and build the matching source
///
/// If the right device fails to open, the already opened left device is
/// released before the error is returned.
pub fn open_frame_source(
    config: &StereoDeviceConfig,
    controls: Arc<CameraControls>,
    opener: &mut DeviceOpener<'_>,
) -> StereoResult<Box<dyn FrameSource>> {
    if config.is_split_frame() {
        debug!(device = config.left(), "Opening split-frame stereo source");
        let device = opener(config.left())?;
        return Ok(Box::new(SplitFrameSource::new(device, controls)));
    }

    debug!(
        left = config.left(),
        right = config.right(),
        "Opening dual-device stereo source"
    );
    let mut left = opener(config.left())?;
    let right = match opener(config.right()) {
        Ok(device) => device,
        Err(e) => {
            left.release();
            return Err(e);
        }
    };
    Ok(Box::new(DualDeviceSource::new(left, right, controls)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::still::StillImageDevice;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| Rgb([x as u8, 0, 0]))
    }

    #[test]
    fn test_split_widths() {
        for width in [8u32, 9, 641] {
            let (left, right) = split_frame(&gradient(width, 4));
            assert_eq!(left.width(), width / 2);
            assert_eq!(right.width(), width - width / 2);
            assert_eq!(left.width() + right.width(), width);
        }
    }

    #[test]
    fn test_split_preserves_columns() {
        let frame = gradient(9, 2);
        let (left, right) = split_frame(&frame);
        assert_eq!(left.get_pixel(3, 0).0[0], 3);
        assert_eq!(right.get_pixel(0, 0).0[0], 4);
        assert_eq!(right.get_pixel(4, 1).0[0], 8);
    }

    #[test]
    fn test_split_source_rotates_each_half() {
        let controls = Arc::new(CameraControls::new());
        let mut source = SplitFrameSource::new(
            Box::new(StillImageDevice::from_image("sbs", gradient(10, 4))),
            Arc::clone(&controls),
        );
        source.set_rotation(CameraSide::Right, 90.0);

        let pair = source.get_frames().unwrap();
        assert_eq!(pair.left.dimensions(), (5, 4));
        assert_eq!(pair.right.dimensions(), (4, 5));
    }

    #[test]
    fn test_release_is_idempotent() {
        let controls = Arc::new(CameraControls::new());
        let mut source = DualDeviceSource::new(
            Box::new(StillImageDevice::from_image("l", gradient(4, 4))),
            Box::new(StillImageDevice::from_image("r", gradient(4, 4))),
            controls,
        );
        assert!(source.get_frames().is_ok());

        source.release();
        source.release();
        assert!(source.get_frames().unwrap_err().is_transient());
    }

    #[test]
    fn test_open_failure_is_device_open_error() {
        let config = StereoDeviceConfig::new("left", "missing");
        let mut opener = |id: &str| -> StereoResult<Box<dyn CaptureDevice>> {
            if id == "missing" {
                Err(StereoError::DeviceOpen {
                    device: id.to_string(),
                    reason: "no such device".into(),
                })
            } else {
                Ok(Box::new(StillImageDevice::from_image(id, gradient(4, 4))))
            }
        };

        let result = open_frame_source(&config, Arc::new(CameraControls::new()), &mut opener);
        assert!(matches!(result, Err(StereoError::DeviceOpen { .. })));
    }
}
