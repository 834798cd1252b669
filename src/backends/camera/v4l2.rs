// SPDX-License-Identifier: GPL-3.0-only
//! V4L2 capture device
//!
//! Opens a `/dev/videoN` node, negotiates a pixel format the converters
//! understand and reads frames through a memory-mapped stream.

use super::CaptureDevice;
use super::format_converters::{Yuv422Order, gray_to_rgb, mjpeg_to_rgb, packed_yuv422_to_rgb};
use super::types::CameraControl;
use super::v4l2_controls::{ControlHandle, control_id};
use crate::errors::{StereoError, StereoResult};
use image::RgbImage;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::{Format, FourCC};

/// Pixel formats tried in order of preference
const PREFERRED_FORMATS: [&[u8; 4]; 4] = [b"MJPG", b"YUYV", b"UYVY", b"GREY"];

const STREAM_BUFFERS: u32 = 4;

/// Resolve a user identifier to a device node
///
/// A bare index `N` means `/dev/videoN`; anything else is used as a path.
pub fn device_path(identifier: &str) -> String {
    if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", identifier)
    } else {
        identifier.to_string()
    }
}

/// Camera opened through V4L2
pub struct V4l2Device {
    path: String,
    format: Format,
    // Field order matters: the stream must be dropped before the device
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    controls: Option<ControlHandle>,
    applied: HashMap<CameraControl, f64>,
}

impl V4l2Device {
    pub fn open(identifier: &str) -> StereoResult<Self> {
        let path = device_path(identifier);
        let open_error = |reason: String| StereoError::DeviceOpen {
            device: path.clone(),
            reason,
        };

        let device = Device::with_path(&path).map_err(|e| open_error(e.to_string()))?;
        let format = negotiate_format(&device).map_err(open_error)?;

        info!(
            path = %path,
            width = format.width,
            height = format.height,
            fourcc = ?format.fourcc,
            "V4L2 format configured"
        );

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| open_error(format!("Failed to create buffer stream: {}", e)))?;

        let controls = ControlHandle::open(&path)
            .inspect_err(|e| warn!(path = %path, error = %e, "Controls unavailable"))
            .ok();

        Ok(Self {
            path,
            format,
            stream: Some(stream),
            device: Some(device),
            controls,
            applied: HashMap::new(),
        })
    }

    fn decode(&self, buf: &[u8]) -> StereoResult<RgbImage> {
        let Format {
            width,
            height,
            fourcc,
            ..
        } = self.format;

        if fourcc == FourCC::new(b"MJPG") {
            mjpeg_to_rgb(buf)
        } else if fourcc == FourCC::new(b"YUYV") {
            packed_yuv422_to_rgb(buf, width, height, Yuv422Order::Yuyv)
        } else if fourcc == FourCC::new(b"UYVY") {
            packed_yuv422_to_rgb(buf, width, height, Yuv422Order::Uyvy)
        } else if fourcc == FourCC::new(b"GREY") {
            gray_to_rgb(buf, width, height)
        } else {
            Err(StereoError::FrameAcquisition(format!(
                "Unsupported pixel format {:?}",
                fourcc
            )))
        }
    }
}

/// Pick the first preferred format the driver accepts, keeping its resolution
fn negotiate_format(device: &Device) -> Result<Format, String> {
    let current = device
        .format()
        .map_err(|e| format!("Failed to query format: {}", e))?;

    for fourcc in PREFERRED_FORMATS {
        let fourcc = FourCC::new(fourcc);
        let requested = Format::new(current.width, current.height, fourcc);
        match device.set_format(&requested) {
            Ok(actual) if actual.fourcc == fourcc => return Ok(actual),
            Ok(actual) => {
                debug!(requested = ?fourcc, got = ?actual.fourcc, "Driver substituted format");
            }
            Err(e) => debug!(requested = ?fourcc, error = %e, "Format rejected"),
        }
    }

    Err(format!(
        "none of MJPG, YUYV, UYVY or GREY accepted (device reports {:?})",
        current.fourcc
    ))
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn read_frame(&mut self) -> StereoResult<RgbImage> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            StereoError::FrameAcquisition(format!("{} has been released", self.path))
        })?;

        let buf = match stream.next() {
            Ok((buf, _meta)) => buf.to_vec(),
            Err(e) => {
                return Err(StereoError::FrameAcquisition(format!(
                    "{}: {}",
                    self.path, e
                )));
            }
        };

        self.decode(&buf)
    }

    fn set_control(&mut self, control: CameraControl, value: f64) -> StereoResult<()> {
        let handle = self.controls.as_ref().ok_or_else(|| {
            StereoError::FrameAcquisition(format!("{} has no control handle", self.path))
        })?;
        match handle.apply(control, value) {
            Ok(applied) => {
                self.applied.insert(control, applied as f64);
                Ok(())
            }
            Err(reason) => {
                warn!(path = %self.path, control = control.display_name(), %reason, "Control not applied");
                Err(StereoError::FrameAcquisition(reason))
            }
        }
    }

    fn control(&self, control: CameraControl) -> Option<f64> {
        self.controls
            .as_ref()
            .and_then(|handle| handle.get(control_id(control)))
            .map(f64::from)
            .or_else(|| self.applied.get(&control).copied())
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!(path = %self.path, "Stopped V4L2 stream");
        }
        self.controls = None;
        if self.device.take().is_some() {
            info!(path = %self.path, "Released V4L2 device");
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path_from_index() {
        assert_eq!(device_path("0"), "/dev/video0");
        assert_eq!(device_path("12"), "/dev/video12");
    }

    #[test]
    fn test_device_path_passthrough() {
        assert_eq!(device_path("/dev/v4l/by-id/usb-cam"), "/dev/v4l/by-id/usb-cam");
        assert_eq!(device_path(""), "");
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let err = V4l2Device::open("/nonexistent/video99").err().unwrap();
        assert!(matches!(err, StereoError::DeviceOpen { .. }));
    }
}
