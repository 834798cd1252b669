// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend
//!
//! [`CaptureDevice`] is the seam between the stereo pipeline and whatever
//! delivers pixels. Two adapters ship with the crate: V4L2 nodes and still
//! image files. [`FrameSource`] combines devices into a left/right pair.

pub mod format_converters;
pub mod frame_loop;
pub mod frame_source;
pub mod still;
pub mod types;
pub mod v4l2;
pub mod v4l2_controls;

pub use frame_loop::{CaptureLoopController, LoopAction};
pub use frame_source::{
    DualDeviceSource, FrameSource, SplitFrameSource, open_frame_source, split_frame,
};
pub use types::*;

use crate::errors::StereoResult;
use image::RgbImage;
use tracing::debug;

/// A single physical capture device
///
/// Implementations must tolerate `release` being called more than once and
/// fail reads after release with a frame acquisition error.
pub trait CaptureDevice: Send {
    /// Identifier the device was opened with
    fn name(&self) -> &str;

    /// Block until the next frame is available
    fn read_frame(&mut self) -> StereoResult<RgbImage>;

    /// Apply a device-native control value
    fn set_control(&mut self, control: CameraControl, value: f64) -> StereoResult<()>;

    /// Current value of a control, if known
    fn control(&self, control: CameraControl) -> Option<f64>;

    /// Close the device
    fn release(&mut self);
}

/// Open a device from a user identifier
///
/// Image file paths open a [`still::StillImageDevice`], everything else is
/// treated as a V4L2 node (`/dev/videoN` or a bare index `N`).
pub fn open_device(identifier: &str) -> StereoResult<Box<dyn CaptureDevice>> {
    if still::is_image_path(identifier) {
        debug!(identifier, "Opening still image device");
        Ok(Box::new(still::StillImageDevice::open(identifier)?))
    } else {
        debug!(identifier, "Opening V4L2 device");
        Ok(Box::new(v4l2::V4l2Device::open(identifier)?))
    }
}
