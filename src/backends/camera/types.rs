// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the stereo camera backends

//! Shared types for stereo camera backends

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// One logical camera of the stereo rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraSide {
    Left,
    Right,
}

impl CameraSide {
    /// Both sides in pair order
    pub const BOTH: [CameraSide; 2] = [CameraSide::Left, CameraSide::Right];

    /// Position of this side in a (left, right) pair
    pub fn index(&self) -> usize {
        match self {
            CameraSide::Left => 0,
            CameraSide::Right => 1,
        }
    }

    /// Capitalized label used for timestamped capture files ("Left_...")
    pub fn capture_label(&self) -> &'static str {
        match self {
            CameraSide::Left => "Left",
            CameraSide::Right => "Right",
        }
    }

    /// Lowercase label used for chessboard files ("left_07.png")
    pub fn chessboard_label(&self) -> &'static str {
        match self {
            CameraSide::Left => "left",
            CameraSide::Right => "right",
        }
    }
}

impl std::fmt::Display for CameraSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} camera", self.capture_label())
    }
}

/// A left/right frame pair acquired together
#[derive(Debug, Clone)]
pub struct FramePair {
    pub left: RgbImage,
    pub right: RgbImage,
    /// When the pair was acquired (best effort, no hardware sync)
    pub captured_at: Instant,
}

impl FramePair {
    pub fn new(left: RgbImage, right: RgbImage) -> Self {
        Self {
            left,
            right,
            captured_at: Instant::now(),
        }
    }

    /// Get the frame for one side
    pub fn get(&self, side: CameraSide) -> &RgbImage {
        match side {
            CameraSide::Left => &self.left,
            CameraSide::Right => &self.right,
        }
    }

    /// Apply the same transform to both frames, keeping the capture instant
    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(CameraSide, RgbImage) -> RgbImage,
    {
        Self {
            left: f(CameraSide::Left, self.left),
            right: f(CameraSide::Right, self.right),
            captured_at: self.captured_at,
        }
    }
}

/// Device-native image controls exposed per camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraControl {
    Brightness,
    Contrast,
    Gain,
    Exposure,
}

impl CameraControl {
    pub const ALL: [CameraControl; 4] = [
        CameraControl::Brightness,
        CameraControl::Contrast,
        CameraControl::Gain,
        CameraControl::Exposure,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            CameraControl::Brightness => "Brightness",
            CameraControl::Contrast => "Contrast",
            CameraControl::Gain => "Gain",
            CameraControl::Exposure => "Exposure",
        }
    }
}

/// Orientation and image controls of one logical camera
///
/// Control values are `None` until the user sets them, so the device keeps
/// its own defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerCameraState {
    /// Rotation in degrees, clockwise, any magnitude
    pub rotation: f64,
    pub brightness: Option<f64>,
    pub contrast: Option<f64>,
    pub gain: Option<f64>,
    pub exposure: Option<f64>,
}

impl PerCameraState {
    pub fn control(&self, control: CameraControl) -> Option<f64> {
        match control {
            CameraControl::Brightness => self.brightness,
            CameraControl::Contrast => self.contrast,
            CameraControl::Gain => self.gain,
            CameraControl::Exposure => self.exposure,
        }
    }

    pub fn set_control(&mut self, control: CameraControl, value: f64) {
        let slot = match control {
            CameraControl::Brightness => &mut self.brightness,
            CameraControl::Contrast => &mut self.contrast,
            CameraControl::Gain => &mut self.gain,
            CameraControl::Exposure => &mut self.exposure,
        };
        *slot = Some(value);
    }

    /// Controls that have been set, in a stable order
    pub fn set_controls(&self) -> Vec<(CameraControl, f64)> {
        CameraControl::ALL
            .iter()
            .filter_map(|&c| self.control(c).map(|v| (c, v)))
            .collect()
    }
}

/// State of one logical camera, owned by that camera alone
#[derive(Debug, Default)]
struct CameraState {
    state: Mutex<PerCameraState>,
    /// Set when a control changed and has not been pushed to the device yet
    controls_dirty: AtomicBool,
}

impl CameraState {
    fn lock(&self) -> MutexGuard<'_, PerCameraState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-camera state shared between the front end and the frame source
///
/// Writers never wait on frame acquisition: the lock only guards a small
/// record and is never held across device I/O.
#[derive(Debug, Default)]
pub struct CameraControls {
    left: CameraState,
    right: CameraState,
}

impl CameraControls {
    pub fn new() -> Self {
        Self::default()
    }

    fn camera(&self, side: CameraSide) -> &CameraState {
        match side {
            CameraSide::Left => &self.left,
            CameraSide::Right => &self.right,
        }
    }

    /// Set the rotation of one camera; applies from the next acquired pair
    pub fn set_rotation(&self, side: CameraSide, degrees: f64) {
        self.camera(side).lock().rotation = degrees;
    }

    pub fn rotation(&self, side: CameraSide) -> f64 {
        self.camera(side).lock().rotation
    }

    /// Record a control value; the frame source pushes it to the device
    /// before its next acquisition
    pub fn set_property(&self, side: CameraSide, control: CameraControl, value: f64) {
        let camera = self.camera(side);
        camera.lock().set_control(control, value);
        camera.controls_dirty.store(true, Ordering::Release);
    }

    /// Copy of the current state of one camera
    pub fn snapshot(&self, side: CameraSide) -> PerCameraState {
        self.camera(side).lock().clone()
    }

    /// Take the state of one camera if its controls changed since the last call
    pub fn take_pending(&self, side: CameraSide) -> Option<PerCameraState> {
        let camera = self.camera(side);
        if camera.controls_dirty.swap(false, Ordering::AcqRel) {
            Some(camera.lock().clone())
        } else {
            None
        }
    }
}

/// Device identifiers of the stereo rig
///
/// Identical identifiers mean a single side-by-side device whose frames are
/// split in half. The mode is decided here once and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StereoDeviceConfig {
    left: String,
    right: String,
    split_frame: bool,
}

impl StereoDeviceConfig {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        let left = left.into();
        let right = right.into();
        let split_frame = left == right;
        Self {
            left,
            right,
            split_frame,
        }
    }

    pub fn left(&self) -> &str {
        &self.left
    }

    pub fn right(&self) -> &str {
        &self.right
    }

    /// True when both logical cameras come from one physical device
    pub fn is_split_frame(&self) -> bool {
        self.split_frame
    }
}
