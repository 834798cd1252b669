// SPDX-License-Identifier: GPL-3.0-only

//! Point cloud file export
//!
//! ASCII PLY with per-vertex color, or LAS/LAZ 1.4 with RGB. The cloud is
//! written to a hidden sibling file first and renamed over the target, so a
//! failed export never leaves a truncated file behind.

use super::point_cloud::PointCloud;
use crate::errors::{StereoError, StereoResult};
use las::{Builder, Color, Point, Writer};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// LAS coordinate precision (1 mm for metric clouds)
const LAS_SCALE: f64 = 0.001;

/// Output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudFormat {
    Ply,
    Las,
    Laz,
}

impl PointCloudFormat {
    /// Pick the format from the extension; unknown extensions get PLY
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("las") => PointCloudFormat::Las,
            Some("laz") => PointCloudFormat::Laz,
            _ => PointCloudFormat::Ply,
        }
    }
}

/// Hidden sibling path the export is staged in
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

/// Write `cloud` to `path` through a staging file
pub fn write_point_cloud(
    cloud: &PointCloud,
    path: &Path,
    format: PointCloudFormat,
) -> StereoResult<()> {
    if path.as_os_str().is_empty() || path.file_name().is_none() {
        return Err(StereoError::empty_path("Point cloud output path"));
    }

    let staging = partial_path(path);
    let result = match format {
        PointCloudFormat::Ply => write_ply(cloud, &staging),
        PointCloudFormat::Las => write_las(cloud, &staging, false),
        PointCloudFormat::Laz => write_las(cloud, &staging, true),
    }
    .and_then(|()| fs::rename(&staging, path).map_err(|e| StereoError::write(path, e)));

    if let Err(e) = &result {
        warn!(path = %path.display(), error = %e, "Point cloud export failed");
        let _ = fs::remove_file(&staging);
    }
    result
}

fn write_ply(cloud: &PointCloud, path: &Path) -> StereoResult<()> {
    let io_error = |e: std::io::Error| StereoError::write(path, e);
    let file = File::create(path).map_err(io_error)?;
    let mut out = BufWriter::new(file);

    write!(
        out,
        "ply\n\
         format ascii 1.0\n\
         element vertex {}\n\
         property float x\n\
         property float y\n\
         property float z\n\
         property uchar red\n\
         property uchar green\n\
         property uchar blue\n\
         end_header\n",
        cloud.len()
    )
    .map_err(io_error)?;

    for (point, [r, g, b]) in cloud.iter() {
        writeln!(out, "{} {} {} {} {} {}", point.x, point.y, point.z, r, g, b).map_err(io_error)?;
    }

    out.flush().map_err(io_error)?;
    out.get_ref().sync_all().map_err(io_error)?;
    debug!(path = %path.display(), "PLY staged");
    Ok(())
}

/// Center of the axis-aligned bounds, used as LAS offset
fn bounds_center(cloud: &PointCloud) -> [f64; 3] {
    if cloud.is_empty() {
        return [0.0; 3];
    }
    let mut min = [f64::MAX; 3];
    let mut max = [f64::MIN; 3];
    for point in cloud.points() {
        for axis in 0..3 {
            let value = point[axis] as f64;
            min[axis] = min[axis].min(value);
            max[axis] = max[axis].max(value);
        }
    }
    [0, 1, 2].map(|axis| (min[axis] + max[axis]) / 2.0)
}

fn write_las(cloud: &PointCloud, path: &Path, compressed: bool) -> StereoResult<()> {
    let las_error = |e: las::Error| StereoError::write(path, e);

    let mut builder = Builder::from((1, 4));
    builder.point_format.has_color = true;
    builder.point_format.is_compressed = compressed;

    let [cx, cy, cz] = bounds_center(cloud);
    let transform = |offset| las::Transform {
        scale: LAS_SCALE,
        offset,
    };
    builder.transforms = las::Vector {
        x: transform(cx),
        y: transform(cy),
        z: transform(cz),
    };

    let header = builder.into_header().map_err(las_error)?;
    let file = File::create(path).map_err(|e| StereoError::write(path, e))?;
    let mut writer = Writer::new(BufWriter::new(file), header).map_err(las_error)?;

    for (point, &[r, g, b]) in cloud.iter() {
        // LAS colors are 16-bit
        let color = Color::new(r as u16 * 257, g as u16 * 257, b as u16 * 257);
        writer
            .write_point(Point {
                x: point.x as f64,
                y: point.y as f64,
                z: point.z as f64,
                color: Some(color),
                ..Default::default()
            })
            .map_err(las_error)?;
    }

    writer.close().map_err(las_error)?;
    debug!(path = %path.display(), compressed, "LAS staged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn sample_cloud() -> PointCloud {
        PointCloud::new(
            vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-0.5, 0.0, 4.25)],
            vec![[255, 0, 0], [0, 128, 255]],
        )
        .unwrap()
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(PointCloudFormat::from_path(Path::new("a.ply")), PointCloudFormat::Ply);
        assert_eq!(PointCloudFormat::from_path(Path::new("a.LAZ")), PointCloudFormat::Laz);
        assert_eq!(PointCloudFormat::from_path(Path::new("a.las")), PointCloudFormat::Las);
        assert_eq!(PointCloudFormat::from_path(Path::new("a")), PointCloudFormat::Ply);
    }

    #[test]
    fn test_ply_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        write_point_cloud(&sample_cloud(), &path, PointCloudFormat::Ply).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "element vertex 2");
        assert_eq!(lines[9], "end_header");
        assert_eq!(lines[10], "1 2 3 255 0 0");
        assert_eq!(lines[11], "-0.5 0 4.25 0 128 255");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn test_las_point_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        write_point_cloud(&sample_cloud(), &path, PointCloudFormat::Las).unwrap();

        let reader = las::Reader::from_path(&path).unwrap();
        assert_eq!(reader.header().number_of_points(), 2);
    }

    #[test]
    fn test_unwritable_path_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cloud.ply");
        let err = write_point_cloud(&sample_cloud(), &path, PointCloudFormat::Ply).unwrap_err();
        assert!(matches!(err, StereoError::Write { .. }));
    }
}
