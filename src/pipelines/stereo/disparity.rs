// SPDX-License-Identifier: GPL-3.0-only

//! Disparity estimation and back-projection
//!
//! [`DisparityEngine`] is the seam for the matching algorithm. The bundled
//! [`BlockMatcher`] is a sum-of-absolute-differences matcher over grayscale
//! images with a uniqueness check and parabolic sub-pixel refinement.

use super::calibration::CalibrationModel;
use crate::backends::camera::FramePair;
use crate::constants::block_matching;
use crate::errors::{StereoError, StereoResult};
use image::{GrayImage, imageops};
use nalgebra::{Matrix4, Point3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Per-pixel horizontal offset between rectified left and right images
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
    /// Values at or below this mark unmatched pixels
    invalid: f32,
}

impl DisparityMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>, invalid: f32) -> StereoResult<Self> {
        if data.len() != width as usize * height as usize {
            return Err(StereoError::Disparity(format!(
                "{} values do not fill a {}x{} map",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            invalid,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major disparity values
    pub fn values(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn is_valid(&self, value: f32) -> bool {
        value.is_finite() && value > self.invalid
    }
}

/// Project every disparity through `q`, row-major
///
/// Unmatched pixels and pixels at zero disparity have no finite depth and
/// come back as `(inf, inf, inf)`.
pub fn reproject_to_3d(disparity: &DisparityMap, q: &Matrix4<f64>) -> Vec<Point3<f32>> {
    let infinite = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
    let mut points = Vec::with_capacity(disparity.values().len());

    for y in 0..disparity.height() {
        for x in 0..disparity.width() {
            let d = disparity.get(x, y);
            if !disparity.is_valid(d) {
                points.push(infinite);
                continue;
            }

            let h = q * Vector4::new(x as f64, y as f64, d as f64, 1.0);
            let w = h[3];
            let point = Point3::new((h[0] / w) as f32, (h[1] / w) as f32, (h[2] / w) as f32);
            if w == 0.0 || !point.iter().all(|c| c.is_finite()) {
                points.push(infinite);
            } else {
                points.push(point);
            }
        }
    }
    points
}

/// Stereo matching algorithm
pub trait DisparityEngine: Send + Sync {
    /// Disparity of the left image relative to the right one
    fn compute_disparity(&self, pair: &FramePair) -> StereoResult<DisparityMap>;

    /// 3-D point per disparity pixel, row-major, infinite where unmatched
    fn back_project(
        &self,
        disparity: &DisparityMap,
        calibration: &dyn CalibrationModel,
    ) -> Vec<Point3<f32>> {
        reproject_to_3d(disparity, &calibration.disparity_to_depth())
    }
}

/// Sum-of-absolute-differences block matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockMatcher {
    /// Odd window side length
    pub block_size: u32,
    pub min_disparity: i32,
    pub num_disparities: u32,
    /// Percent the best cost must beat every non-adjacent candidate by
    pub uniqueness_ratio: u32,
}

impl Default for BlockMatcher {
    fn default() -> Self {
        Self {
            block_size: block_matching::BLOCK_SIZE,
            min_disparity: block_matching::MIN_DISPARITY,
            num_disparities: block_matching::NUM_DISPARITIES,
            uniqueness_ratio: block_matching::UNIQUENESS_RATIO,
        }
    }
}

impl BlockMatcher {
    fn validate(&self) -> StereoResult<()> {
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(StereoError::Disparity(format!(
                "block size must be odd and at least 3, got {}",
                self.block_size
            )));
        }
        if self.num_disparities == 0 {
            return Err(StereoError::Disparity(
                "number of disparities must be positive".into(),
            ));
        }
        if self.uniqueness_ratio >= 100 {
            return Err(StereoError::Disparity(format!(
                "uniqueness ratio must be below 100, got {}",
                self.uniqueness_ratio
            )));
        }
        Ok(())
    }

    fn match_gray(&self, left: &GrayImage, right: &GrayImage) -> Vec<f32> {
        let (width, height) = left.dimensions();
        let (w, h) = (width as usize, height as usize);
        let half = (self.block_size / 2) as usize;
        let candidates = self.num_disparities as usize;
        let invalid = self.min_disparity as f32 - 1.0;
        let max_disparity = self.min_disparity + self.num_disparities as i32 - 1;

        let mut out = vec![invalid; w * h];
        if w < self.block_size as usize || h < self.block_size as usize {
            return out;
        }

        let left = left.as_raw();
        let right = right.as_raw();
        let abs_diff = |x: usize, y: usize, d: i32| -> u32 {
            let xr = x as i64 - d as i64;
            if xr < 0 || xr >= w as i64 {
                u8::MAX as u32
            } else {
                left[y * w + x].abs_diff(right[y * w + xr as usize]) as u32
            }
        };

        // Column sums of |L - R| over the current window rows, per candidate
        let mut column_sums = vec![0u32; candidates * w];
        for (i, sums) in column_sums.chunks_exact_mut(w).enumerate() {
            let d = self.min_disparity + i as i32;
            for row in 0..self.block_size as usize {
                for (x, sum) in sums.iter_mut().enumerate() {
                    *sum += abs_diff(x, row, d);
                }
            }
        }

        // Pixels whose window sees the whole disparity range
        let first_x = half + max_disparity.max(0) as usize;
        let last_x = (w - half).saturating_sub((-self.min_disparity).max(0) as usize);

        let mut costs = vec![0u32; candidates];
        for y in half..h - half {
            for x in first_x..last_x {
                for (i, cost) in costs.iter_mut().enumerate() {
                    let sums = &column_sums[i * w..(i + 1) * w];
                    *cost = sums[x - half..=x + half].iter().sum();
                }
                if let Some(d) = self.select(&costs) {
                    out[y * w + x] = self.min_disparity as f32 + d;
                }
            }

            // Slide the window one row down
            let (leaving, entering) = (y - half, y + half + 1);
            if entering < h {
                for (i, sums) in column_sums.chunks_exact_mut(w).enumerate() {
                    let d = self.min_disparity + i as i32;
                    for (x, sum) in sums.iter_mut().enumerate() {
                        *sum = *sum - abs_diff(x, leaving, d) + abs_diff(x, entering, d);
                    }
                }
            }
        }

        out
    }

    /// Winning candidate offset with sub-pixel refinement, `None` if ambiguous
    fn select(&self, costs: &[u32]) -> Option<f32> {
        let (best, &best_cost) = costs.iter().enumerate().min_by_key(|(_, c)| **c)?;

        let ratio = self.uniqueness_ratio as u64;
        let ambiguous = costs.iter().enumerate().any(|(i, &c)| {
            i.abs_diff(best) > 1 && (c as u64) * (100 - ratio) < (best_cost as u64) * 100
        });
        if ambiguous {
            return None;
        }

        let mut refined = best as f32;
        if best > 0 && best + 1 < costs.len() {
            let prev = costs[best - 1] as f32;
            let next = costs[best + 1] as f32;
            let denominator = 2.0 * (prev + next - 2.0 * best_cost as f32);
            if denominator > 0.0 {
                refined += (prev - next) / denominator;
            }
        }
        Some(refined)
    }
}

impl DisparityEngine for BlockMatcher {
    fn compute_disparity(&self, pair: &FramePair) -> StereoResult<DisparityMap> {
        self.validate()?;
        if pair.left.dimensions() != pair.right.dimensions() {
            return Err(StereoError::Disparity(format!(
                "left is {:?} but right is {:?}",
                pair.left.dimensions(),
                pair.right.dimensions()
            )));
        }

        let left = imageops::grayscale(&pair.left);
        let right = imageops::grayscale(&pair.right);
        let (width, height) = left.dimensions();
        debug!(width, height, matcher = ?self, "Computing disparity");

        let data = self.match_gray(&left, &right);
        DisparityMap::new(width, height, data, self.min_disparity as f32 - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
        let mut state = seed;
        RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let v = (state >> 16) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_block_matcher_recovers_shift() {
        let left = noise(64, 24, 7);
        let filler = noise(64, 24, 99);
        let right = RgbImage::from_fn(64, 24, |x, y| {
            if x + 4 < 64 {
                *left.get_pixel(x + 4, y)
            } else {
                *filler.get_pixel(x, y)
            }
        });

        let matcher = BlockMatcher {
            num_disparities: 16,
            ..BlockMatcher::default()
        };
        let map = matcher
            .compute_disparity(&FramePair::new(left, right))
            .unwrap();

        let d = map.get(40, 12);
        assert!((d - 4.0).abs() <= 0.5, "disparity {} not near 4", d);
        // Left border cannot see the whole search range
        assert!(!map.is_valid(map.get(2, 12)));
    }

    #[test]
    fn test_even_block_size_rejected() {
        let matcher = BlockMatcher {
            block_size: 4,
            ..BlockMatcher::default()
        };
        let pair = FramePair::new(RgbImage::new(8, 8), RgbImage::new(8, 8));
        assert!(matches!(
            matcher.compute_disparity(&pair),
            Err(StereoError::Disparity(_))
        ));
    }

    #[test]
    fn test_reproject_marks_invalid_as_infinite() {
        let map = DisparityMap::new(2, 1, vec![-1.0, 2.0], -1.0).unwrap();
        let mut q = Matrix4::zeros();
        q[(0, 0)] = 1.0;
        q[(1, 1)] = 1.0;
        q[(2, 3)] = 10.0;
        q[(3, 2)] = 1.0;

        let points = reproject_to_3d(&map, &q);
        assert!(points[0].x.is_infinite());
        assert_eq!(points[1], Point3::new(0.5, 0.0, 5.0));
    }
}
