// SPDX-License-Identifier: GPL-3.0-only

//! Stereo Workbench - capture, calibration and point clouds for a stereo rig
//!
//! Drives two cameras (or one side-by-side camera) as a stereo pair: live
//! preview, timed captures, chessboard collection for calibration, and
//! rendering rectified pairs into colored point clouds.
//!
//! # Architecture
//!
//! - [`backends`]: capture devices and the stereo frame sources built on them
//! - [`pipelines`]: rotation, chessboard detection, calibration, rectification,
//!   disparity and point clouds
//! - [`worker`]: the background capture loop and its front-end handle
//! - [`terminal`]: the interactive terminal workbench
//! - [`config`]: user configuration handling
//! - [`storage`]: capture file naming and saving

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipelines;
pub mod preview;
pub mod storage;
pub mod terminal;
pub mod worker;

// Re-export commonly used types
pub use backends::camera::{CameraSide, FramePair, FrameSource, StereoDeviceConfig};
pub use config::Config;
pub use errors::{StereoError, StereoResult};
pub use worker::{
    CaptureWorker, ChessboardOutcome, RunningWorker, WorkerConfig, WorkerHandle, WorkerMode,
};
