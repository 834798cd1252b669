// SPDX-License-Identifier: GPL-3.0-only

//! Stereo reconstruction pipeline
//!
//! ```text
//! FrameSource ─▶ RectifiedPair ─▶ DisparityEngine ─▶ PointCloudBuilder ─▶ PLY / LAS
//!                     ▲                                    ▲
//!                     └────────── CalibrationModel ────────┘
//! ```

mod calibration;
mod disparity;
mod export;
mod point_cloud;
mod rectified;

pub use calibration::{CalibrationData, CalibrationModel, CameraParameters, StereoCalibration};
pub use disparity::{BlockMatcher, DisparityEngine, DisparityMap, reproject_to_3d};
pub use export::{PointCloudFormat, write_point_cloud};
pub use point_cloud::{PointCloud, PointCloudBuilder, render_point_cloud};
pub use rectified::RectifiedPair;
