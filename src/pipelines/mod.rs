// SPDX-License-Identifier: GPL-3.0-only

//! Processing pipelines
//!
//! - [`geometry`]: rotation, sampling and scaling of frames
//! - [`stereo`]: rectification, disparity and point clouds
//! - [`chessboard`]: calibration target presence check
//! - [`calibrate`]: invocation of the external calibration solver

pub mod calibrate;
pub mod chessboard;
pub mod geometry;
pub mod stereo;
