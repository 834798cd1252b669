// SPDX-License-Identifier: GPL-3.0-only

//! Rectified stereo pairs
//!
//! Wraps a [`FrameSource`] so every pair it delivers is run through the
//! calibration model first. Without a live source it rectifies pairs handed
//! in directly, which is how the offline render path uses it.

use super::calibration::CalibrationModel;
use crate::backends::camera::{CameraControls, FrameSource, FramePair};
use crate::errors::{StereoError, StereoResult};
use std::sync::Arc;

/// Frame source delivering rectified pairs
pub struct RectifiedPair {
    source: Option<Box<dyn FrameSource>>,
    calibration: Option<Arc<dyn CalibrationModel>>,
    controls: Arc<CameraControls>,
}

impl RectifiedPair {
    /// Rectify pairs from a live source
    ///
    /// A missing model is accepted here; every call that needs it then fails
    /// with a rectification error.
    pub fn new(
        source: Box<dyn FrameSource>,
        calibration: Option<Arc<dyn CalibrationModel>>,
    ) -> Self {
        let controls = Arc::clone(source.controls());
        Self {
            source: Some(source),
            calibration,
            controls,
        }
    }

    /// Rectify pairs supplied by the caller, no device attached
    pub fn offline(calibration: Arc<dyn CalibrationModel>) -> Self {
        Self {
            source: None,
            calibration: Some(calibration),
            controls: Arc::new(CameraControls::new()),
        }
    }

    /// Apply the calibration model to a raw pair
    pub fn rectify(&self, pair: FramePair) -> StereoResult<FramePair> {
        let calibration = self
            .calibration
            .as_ref()
            .ok_or_else(|| StereoError::Rectification("no calibration model loaded".into()))?;
        calibration.rectify(pair)
    }
}

impl FrameSource for RectifiedPair {
    fn get_frames(&mut self) -> StereoResult<FramePair> {
        let source = self.source.as_mut().ok_or_else(|| {
            StereoError::FrameAcquisition("rectified pair has no live source".into())
        })?;
        let raw = source.get_frames()?;
        self.rectify(raw)
    }

    fn controls(&self) -> &Arc<CameraControls> {
        &self.controls
    }

    fn release(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.release();
        }
    }

    fn is_split_frame(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|source| source.is_split_frame())
    }
}
