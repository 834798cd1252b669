// SPDX-License-Identifier: GPL-3.0-only

//! Capture file naming and saving

use crate::backends::camera::CameraSide;
use crate::constants::file_names::TIMESTAMP_FORMAT;
use crate::errors::{StereoError, StereoResult};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reject an unset directory before any device or disk access
pub fn validate_dir(dir: &Path, what: &str) -> StereoResult<()> {
    if dir.as_os_str().is_empty() {
        return Err(StereoError::empty_path(what));
    }
    if dir.exists() && !dir.is_dir() {
        return Err(StereoError::InvalidPath(format!(
            "{} {} is not a directory",
            what,
            dir.display()
        )));
    }
    Ok(())
}

/// `Left_2024-05-01_13-45-10.png`
pub fn capture_file_name(side: CameraSide, timestamp: &DateTime<Local>, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        side.capture_label(),
        timestamp.format(TIMESTAMP_FORMAT),
        extension
    )
}

/// `left_07.png` for index 7 of 30; the index is padded to the digit count
/// of `total`
pub fn chessboard_file_name(side: CameraSide, index: u32, total: u32, extension: &str) -> String {
    let width = total.to_string().len();
    format!(
        "{}_{:0width$}.{}",
        side.chessboard_label(),
        index,
        extension,
        width = width
    )
}

/// Encode `image` to `dir/name`, creating `dir` if needed
pub fn save_image(image: &RgbImage, dir: &Path, name: &str) -> StereoResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| StereoError::write(dir, e))?;
    let path = dir.join(name);
    image.save(&path).map_err(|e| StereoError::write(&path, e))?;
    debug!(path = %path.display(), "Saved image");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_capture_file_name() {
        let timestamp = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).unwrap();
        assert_eq!(
            capture_file_name(CameraSide::Left, &timestamp, "png"),
            "Left_2024-05-01_13-45-10.png"
        );
        assert_eq!(
            capture_file_name(CameraSide::Right, &timestamp, "png"),
            "Right_2024-05-01_13-45-10.png"
        );
    }

    #[test]
    fn test_chessboard_padding_follows_total() {
        assert_eq!(chessboard_file_name(CameraSide::Left, 3, 12, "png"), "left_03.png");
        assert_eq!(chessboard_file_name(CameraSide::Right, 7, 100, "png"), "right_007.png");
        assert_eq!(chessboard_file_name(CameraSide::Left, 5, 9, "png"), "left_5.png");
        assert_eq!(chessboard_file_name(CameraSide::Left, 30, 30, "png"), "left_30.png");
    }

    #[test]
    fn test_empty_dir_rejected() {
        let err = validate_dir(Path::new(""), "Capture directory").unwrap_err();
        assert_eq!(err, StereoError::empty_path("Capture directory"));
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let path = save_image(&RgbImage::new(2, 2), &target, "left_1.png").unwrap();
        assert!(path.is_file());
    }
}
