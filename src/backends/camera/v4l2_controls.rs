// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 image controls
//!
//! Brightness, contrast, gain and exposure are set through the control
//! ioctls on a handle kept open next to the capture stream. Values are
//! device-native and clamped to the range the driver reports.

use super::types::CameraControl;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::os::unix::io::AsRawFd;
use tracing::{debug, trace};

const USER_CLASS_BASE: u32 = 0x0098_0900;
const CAMERA_CLASS_BASE: u32 = 0x009a_0900;

pub const V4L2_CID_BRIGHTNESS: u32 = USER_CLASS_BASE;
pub const V4L2_CID_CONTRAST: u32 = USER_CLASS_BASE + 1;
pub const V4L2_CID_GAIN: u32 = USER_CLASS_BASE + 19;
pub const V4L2_CID_EXPOSURE_AUTO: u32 = CAMERA_CLASS_BASE + 1;
/// In 100 µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = CAMERA_CLASS_BASE + 2;

pub const V4L2_EXPOSURE_MANUAL: i32 = 1;

const FLAG_DISABLED: u32 = 0x0001;

/// `_IOWR('V', nr, size)`
const fn iowr(nr: u32, size: usize) -> libc::c_ulong {
    ((3u32 << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr) as libc::c_ulong
}

#[repr(C)]
#[derive(Default)]
struct RawControl {
    id: u32,
    value: i32,
}

#[repr(C)]
#[derive(Default)]
struct RawQuery {
    id: u32,
    kind: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

const VIDIOC_G_CTRL: libc::c_ulong = iowr(27, size_of::<RawControl>());
const VIDIOC_S_CTRL: libc::c_ulong = iowr(28, size_of::<RawControl>());
const VIDIOC_QUERYCTRL: libc::c_ulong = iowr(36, size_of::<RawQuery>());

/// Range the driver reports for one control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRange {
    pub id: u32,
    pub minimum: i32,
    pub maximum: i32,
    pub default_value: i32,
    pub disabled: bool,
}

impl ControlRange {
    pub fn clamp(&self, value: f64) -> i32 {
        (value.round() as i64).clamp(self.minimum as i64, self.maximum as i64) as i32
    }
}

/// Control id behind a [`CameraControl`]
pub fn control_id(control: CameraControl) -> u32 {
    match control {
        CameraControl::Brightness => V4L2_CID_BRIGHTNESS,
        CameraControl::Contrast => V4L2_CID_CONTRAST,
        CameraControl::Gain => V4L2_CID_GAIN,
        CameraControl::Exposure => V4L2_CID_EXPOSURE_ABSOLUTE,
    }
}

/// Open handle on a device node used only for control ioctls
pub struct ControlHandle {
    path: String,
    file: File,
}

impl ControlHandle {
    pub fn open(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }

    fn ioctl<T>(&self, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
        // SAFETY: `arg` is a live #[repr(C)] struct of the size encoded in
        // `request`, and the fd stays open for the duration of the call.
        let result = unsafe { libc::ioctl(self.file.as_raw_fd(), request, arg as *mut T) };
        if result < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Range of a control, `None` if the driver does not know it
    pub fn query(&self, id: u32) -> Option<ControlRange> {
        let mut raw = RawQuery {
            id,
            ..RawQuery::default()
        };
        self.ioctl(VIDIOC_QUERYCTRL, &mut raw).ok()?;
        Some(ControlRange {
            id: raw.id,
            minimum: raw.minimum,
            maximum: raw.maximum,
            default_value: raw.default_value,
            disabled: raw.flags & FLAG_DISABLED != 0,
        })
    }

    pub fn get(&self, id: u32) -> Option<i32> {
        let mut raw = RawControl { id, value: 0 };
        match self.ioctl(VIDIOC_G_CTRL, &mut raw) {
            Ok(()) => Some(raw.value),
            Err(e) => {
                trace!(path = %self.path, id, error = %e, "Control read failed");
                None
            }
        }
    }

    pub fn set(&self, id: u32, value: i32) -> io::Result<()> {
        let mut raw = RawControl { id, value };
        self.ioctl(VIDIOC_S_CTRL, &mut raw)
    }

    /// Clamp `value` into the device range and apply it, returning the value
    /// the device now holds
    ///
    /// Exposure is ignored while auto exposure is on, so the mode is switched
    /// to manual first.
    pub fn apply(&self, control: CameraControl, value: f64) -> Result<i32, String> {
        let id = control_id(control);
        let range = self
            .query(id)
            .filter(|range| !range.disabled)
            .ok_or_else(|| format!("{} not supported by {}", control.display_name(), self.path))?;

        if control == CameraControl::Exposure {
            self.set(V4L2_CID_EXPOSURE_AUTO, V4L2_EXPOSURE_MANUAL)
                .map_err(|e| format!("cannot disable auto exposure: {}", e))?;
        }

        let clamped = range.clamp(value);
        if clamped as f64 != value.round() {
            debug!(
                path = %self.path,
                control = control.display_name(),
                requested = value,
                applied = clamped,
                "Clamped to device range"
            );
        }
        self.set(id, clamped)
            .map_err(|e| format!("{} rejected: {}", control.display_name(), e))?;
        Ok(clamped)
    }
}
