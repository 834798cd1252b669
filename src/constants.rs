// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Default viewport scale for the live preview, in percent
pub const DEFAULT_PREVIEW_SCALE: u32 = 80;

/// Default interval between timed dual captures
pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of chessboard pairs collected per session
pub const DEFAULT_CHESSBOARD_COUNT: u32 = 30;

/// Pause (with live preview) between two saved chessboard pairs
pub const DEFAULT_CHESSBOARD_CADENCE: Duration = Duration::from_secs(2);

/// Upper bound on a single idle/preview tick so the loop yields
pub const WORKER_TICK: Duration = Duration::from_millis(10);

/// Default file extension for captured images (lossless)
pub const DEFAULT_IMAGE_EXTENSION: &str = "png";

/// Chessboard target geometry
pub mod chessboard {
    /// Inner corners along the board's rows
    pub const ROWS: u32 = 6;
    /// Inner corners along the board's columns
    pub const COLUMNS: u32 = 9;
    /// Edge length of a single square, in centimetres
    pub const SQUARE_SIZE: f32 = 0.5571;
}

/// Capture file naming
pub mod file_names {
    /// Timestamp layout used in ad-hoc and interval capture names
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

    /// Name of the calibration model file inside a calibration folder
    pub const CALIBRATION_FILE: &str = "stereo_calibration.json";

    /// Name of the user configuration file
    pub const CONFIG_FILE: &str = "config.json";

    /// Application directory name under the platform config/cache dirs
    pub const APP_DIR: &str = "stereo-workbench";
}

/// Defaults for the bundled block matcher
pub mod block_matching {
    /// Side length of the matching window (odd)
    pub const BLOCK_SIZE: u32 = 5;
    /// Smallest disparity searched
    pub const MIN_DISPARITY: i32 = 0;
    /// Number of disparities searched (multiple of 16)
    pub const NUM_DISPARITIES: u32 = 64;
    /// Required margin, in percent, of the best cost over the runner-up
    pub const UNIQUENESS_RATIO: u32 = 10;
}

/// Default external calibration program (StereoVision's CLI)
pub const DEFAULT_CALIBRATION_PROGRAM: &str = "calibrate_cameras";
