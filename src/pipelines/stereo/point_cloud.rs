// SPDX-License-Identifier: GPL-3.0-only

//! Colored point clouds from rectified pairs

use super::calibration::{CalibrationModel, StereoCalibration};
use super::disparity::DisparityEngine;
use super::export::{self, PointCloudFormat};
use super::rectified::RectifiedPair;
use crate::backends::camera::FramePair;
use crate::backends::camera::still::load_image;
use crate::errors::{StereoError, StereoResult};
use image::RgbImage;
use nalgebra::Point3;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered points with one RGB color each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<Point3<f32>>,
    colors: Vec<[u8; 3]>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>, colors: Vec<[u8; 3]>) -> StereoResult<Self> {
        if points.len() != colors.len() {
            return Err(StereoError::Disparity(format!(
                "{} points but {} colors",
                points.len(),
                colors.len()
            )));
        }
        Ok(Self { points, colors })
    }

    /// Attach colors from `left` to row-major back-projected points
    pub fn from_points(points: Vec<Point3<f32>>, left: &RgbImage) -> StereoResult<Self> {
        let pixels = left.width() as usize * left.height() as usize;
        if points.len() != pixels {
            return Err(StereoError::Disparity(format!(
                "{} points cannot be colored from a {}x{} image",
                points.len(),
                left.width(),
                left.height()
            )));
        }
        let colors = left.pixels().map(|p| p.0).collect();
        Ok(Self { points, colors })
    }

    /// Drop every point with a non-finite coordinate
    pub fn filter_infinity(self) -> Self {
        let (points, colors) = self
            .points
            .into_iter()
            .zip(self.colors)
            .filter(|(point, _)| point.iter().all(|c| c.is_finite()))
            .unzip();
        Self { points, colors }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Point3<f32>, &[u8; 3])> {
        self.points.iter().zip(self.colors.iter())
    }

    /// Write the cloud, format chosen by the file extension
    ///
    /// An existing file at `path` is only replaced once the new cloud has
    /// been written completely.
    pub fn write(&self, path: &Path) -> StereoResult<()> {
        let format = PointCloudFormat::from_path(path);
        export::write_point_cloud(self, path, format)?;
        info!(
            path = %path.display(),
            points = self.len(),
            ?format,
            "Wrote point cloud"
        );
        Ok(())
    }
}

/// Turns a rectified pair into a filtered point cloud
pub struct PointCloudBuilder<'a> {
    calibration: &'a dyn CalibrationModel,
    engine: &'a dyn DisparityEngine,
}

impl<'a> PointCloudBuilder<'a> {
    pub fn new(calibration: &'a dyn CalibrationModel, engine: &'a dyn DisparityEngine) -> Self {
        Self {
            calibration,
            engine,
        }
    }

    /// Disparity, back-projection, coloring from the left image and
    /// removal of points without finite depth
    pub fn build(&self, rectified: &FramePair) -> StereoResult<PointCloud> {
        let disparity = self.engine.compute_disparity(rectified)?;
        let points = self.engine.back_project(&disparity, self.calibration);
        let cloud = PointCloud::from_points(points, &rectified.left)?;

        let total = cloud.len();
        let cloud = cloud.filter_infinity();
        debug!(total, kept = cloud.len(), "Filtered points without finite depth");
        Ok(cloud)
    }
}

/// Render two stills into a point cloud file using a saved calibration
///
/// Builds an offline rectifier and builder for this single call; no live
/// device is involved.
pub fn render_point_cloud(
    calibration_dir: &Path,
    left: &Path,
    right: &Path,
    output: &Path,
    engine: &dyn DisparityEngine,
) -> StereoResult<PointCloud> {
    for (what, path) in [
        ("Calibration directory", calibration_dir),
        ("Left image path", left),
        ("Right image path", right),
        ("Output path", output),
    ] {
        if path.as_os_str().is_empty() {
            return Err(StereoError::empty_path(what));
        }
    }

    let calibration = Arc::new(StereoCalibration::load(calibration_dir)?);
    let pair = FramePair::new(load_image(left)?, load_image(right)?);

    let rectifier = RectifiedPair::offline(Arc::clone(&calibration) as Arc<dyn CalibrationModel>);
    let rectified = rectifier.rectify(pair)?;

    let cloud = PointCloudBuilder::new(calibration.as_ref(), engine).build(&rectified)?;
    cloud.write(output)?;
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_filter_infinity_counts() {
        let points = vec![
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(f32::INFINITY, 0.0, 1.0),
            Point3::new(1.0, f32::NAN, 1.0),
            Point3::new(1.0, 2.0, 3.0),
        ];
        let colors = vec![[1, 1, 1], [2, 2, 2], [3, 3, 3], [4, 4, 4]];
        let cloud = PointCloud::new(points, colors).unwrap().filter_infinity();

        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.colors(), &[[1, 1, 1], [4, 4, 4]]);
    }

    #[test]
    fn test_colors_follow_pixel_order() {
        let left = RgbImage::from_fn(2, 1, |x, _| Rgb([x as u8 * 100, 10, 20]));
        let points = vec![Point3::new(0.0, 0.0, 1.0); 2];
        let cloud = PointCloud::from_points(points, &left).unwrap();

        assert_eq!(cloud.colors(), &[[0, 10, 20], [100, 10, 20]]);
    }

    #[test]
    fn test_point_count_must_match_image() {
        let left = RgbImage::new(2, 2);
        assert!(PointCloud::from_points(vec![Point3::origin()], &left).is_err());
    }
}
