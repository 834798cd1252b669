// SPDX-License-Identifier: GPL-3.0-only

//! Stereo calibration model
//!
//! The calibration solver runs outside this crate. What it leaves behind is a
//! `stereo_calibration.json` file holding, per camera, the intrinsics,
//! distortion, rectification rotation and projection, plus the shared
//! disparity-to-depth matrix `Q`. Loading the file precomputes the
//! undistort-and-rectify lookup maps so rectifying a pair is a pure remap.

use crate::backends::camera::{CameraSide, FramePair};
use crate::constants::file_names::CALIBRATION_FILE;
use crate::errors::{StereoError, StereoResult};
use crate::pipelines::geometry::sample_bilinear;
use image::RgbImage;
use nalgebra::{Matrix3, Matrix3x4, Matrix4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Calibration as seen by the pipeline: a rectifying transform and a
/// disparity-to-depth mapping
pub trait CalibrationModel: Send + Sync {
    /// Rectify a raw pair so epipolar lines become horizontal scanlines
    fn rectify(&self, pair: FramePair) -> StereoResult<FramePair>;

    /// 4×4 matrix mapping `(x, y, disparity, 1)` to homogeneous 3-D points
    fn disparity_to_depth(&self) -> Matrix4<f64>;
}

/// Parameters of one camera, row-major as written by the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraParameters {
    pub camera_matrix: [[f64; 3]; 3],
    /// k1, k2, p1, p2, k3
    pub distortion: [f64; 5],
    pub rectification: [[f64; 3]; 3],
    pub projection: [[f64; 4]; 3],
}

/// On-disk layout of `stereo_calibration.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub left: CameraParameters,
    pub right: CameraParameters,
    pub disparity_to_depth: [[f64; 4]; 4],
    /// Expected (width, height) of raw input frames
    pub image_size: [u32; 2],
}

/// Per-pixel source coordinates of one rectified image
#[derive(Debug, Clone)]
struct RectifyMap {
    width: u32,
    height: u32,
    coords: Vec<(f32, f32)>,
}

impl RectifyMap {
    /// Build the inverse map the way `initUndistortRectifyMap` does:
    /// each rectified pixel is un-rotated, distorted and projected back
    /// through the original camera matrix.
    fn build(params: &CameraParameters, width: u32, height: u32) -> StereoResult<Self> {
        let k = Matrix3::from_fn(|r, c| params.camera_matrix[r][c]);
        let rotation = Matrix3::from_fn(|r, c| params.rectification[r][c]);
        let projection = Matrix3x4::from_fn(|r, c| params.projection[r][c]);
        let new_k = projection.fixed_view::<3, 3>(0, 0).into_owned();

        let inverse = (new_k * rotation).try_inverse().ok_or_else(|| {
            StereoError::Rectification("projection × rectification is singular".into())
        })?;

        let [k1, k2, p1, p2, k3] = params.distortion;
        let (fx, fy) = (k[(0, 0)], k[(1, 1)]);
        let (cx, cy, skew) = (k[(0, 2)], k[(1, 2)], k[(0, 1)]);

        let mut coords = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                let (u, v) = (u as f64, v as f64);
                let w = inverse[(2, 0)] * u + inverse[(2, 1)] * v + inverse[(2, 2)];
                let w = if w == 0.0 { f64::EPSILON } else { w };
                let x = (inverse[(0, 0)] * u + inverse[(0, 1)] * v + inverse[(0, 2)]) / w;
                let y = (inverse[(1, 0)] * u + inverse[(1, 1)] * v + inverse[(1, 2)]) / w;

                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

                let map_x = fx * xd + skew * yd + cx;
                let map_y = fy * yd + cy;
                coords.push((map_x as f32, map_y as f32));
            }
        }

        Ok(Self {
            width,
            height,
            coords,
        })
    }

    fn remap(&self, frame: &RgbImage) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let (sx, sy) = self.coords[(y * self.width + x) as usize];
            sample_bilinear(frame, sx as f64, sy as f64)
        })
    }
}

/// Calibration loaded from disk, ready to rectify
#[derive(Debug, Clone)]
pub struct StereoCalibration {
    data: CalibrationData,
    q: Matrix4<f64>,
    maps: [RectifyMap; 2],
}

impl StereoCalibration {
    /// Build the model and its lookup maps from raw parameters
    pub fn from_data(data: CalibrationData) -> StereoResult<Self> {
        let [width, height] = data.image_size;
        if width == 0 || height == 0 {
            return Err(StereoError::Rectification(format!(
                "invalid calibration image size {}x{}",
                width, height
            )));
        }

        let maps = [
            RectifyMap::build(&data.left, width, height)?,
            RectifyMap::build(&data.right, width, height)?,
        ];
        let q = Matrix4::from_fn(|r, c| data.disparity_to_depth[r][c]);

        Ok(Self { data, q, maps })
    }

    /// Load `stereo_calibration.json` from a calibration folder
    pub fn load(dir: &Path) -> StereoResult<Self> {
        if dir.as_os_str().is_empty() {
            return Err(StereoError::empty_path("Calibration directory"));
        }

        let path = dir.join(CALIBRATION_FILE);
        let load_error = |reason: String| StereoError::CalibrationLoad {
            path: path.clone(),
            reason,
        };

        let contents = fs::read_to_string(&path).map_err(|e| load_error(e.to_string()))?;
        let data: CalibrationData =
            serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))?;

        let calibration = Self::from_data(data).map_err(|e| load_error(e.to_string()))?;
        info!(
            path = %path.display(),
            width = calibration.data.image_size[0],
            height = calibration.data.image_size[1],
            "Loaded stereo calibration"
        );
        Ok(calibration)
    }

    /// Write the model to `stereo_calibration.json` in `dir`
    pub fn save(&self, dir: &Path) -> StereoResult<()> {
        if dir.as_os_str().is_empty() {
            return Err(StereoError::empty_path("Calibration directory"));
        }
        let path = dir.join(CALIBRATION_FILE);
        fs::create_dir_all(dir).map_err(|e| StereoError::write(dir, e))?;
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| StereoError::write(&path, e))?;
        fs::write(&path, json).map_err(|e| StereoError::write(&path, e))?;
        debug!(path = %path.display(), "Saved stereo calibration");
        Ok(())
    }

    /// Distortion-free, already rectified rig with a horizontal baseline
    ///
    /// Rectification is then an identity remap and depth is
    /// `focal × baseline / disparity`.
    pub fn ideal(width: u32, height: u32, focal: f64, baseline: f64) -> StereoResult<Self> {
        let cx = (width as f64 - 1.0) / 2.0;
        let cy = (height as f64 - 1.0) / 2.0;
        let camera_matrix = [[focal, 0.0, cx], [0.0, focal, cy], [0.0, 0.0, 1.0]];
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let camera = |tx: f64| CameraParameters {
            camera_matrix,
            distortion: [0.0; 5],
            rectification: identity,
            projection: [
                [focal, 0.0, cx, tx],
                [0.0, focal, cy, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        };

        Self::from_data(CalibrationData {
            left: camera(0.0),
            right: camera(-focal * baseline),
            disparity_to_depth: [
                [1.0, 0.0, 0.0, -cx],
                [0.0, 1.0, 0.0, -cy],
                [0.0, 0.0, 0.0, focal],
                [0.0, 0.0, 1.0 / baseline, 0.0],
            ],
            image_size: [width, height],
        })
    }

    /// Raw parameters as stored on disk
    pub fn data(&self) -> &CalibrationData {
        &self.data
    }

    /// Expected (width, height) of raw frames
    pub fn image_size(&self) -> (u32, u32) {
        (self.data.image_size[0], self.data.image_size[1])
    }
}

impl CalibrationModel for StereoCalibration {
    fn rectify(&self, pair: FramePair) -> StereoResult<FramePair> {
        let expected = self.image_size();
        for side in CameraSide::BOTH {
            let actual = pair.get(side).dimensions();
            if actual != expected {
                return Err(StereoError::Rectification(format!(
                    "{} frame is {}x{}, calibration expects {}x{}",
                    side, actual.0, actual.1, expected.0, expected.1
                )));
            }
        }

        let maps = &self.maps;
        Ok(pair.map(|side, frame| maps[side.index()].remap(&frame)))
    }

    fn disparity_to_depth(&self) -> Matrix4<f64> {
        self.q
    }
}
