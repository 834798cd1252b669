// SPDX-License-Identifier: GPL-3.0-only

//! User configuration
//!
//! Stored as JSON in `<config_dir>/stereo-workbench/config.json`. Missing
//! fields take their defaults so older files keep loading.

use crate::constants::{
    self, DEFAULT_CALIBRATION_PROGRAM, DEFAULT_CHESSBOARD_CADENCE, DEFAULT_CHESSBOARD_COUNT,
    DEFAULT_IMAGE_EXTENSION, DEFAULT_PREVIEW_SCALE, chessboard, file_names,
};
use crate::errors::{StereoError, StereoResult};
use crate::pipelines::stereo::BlockMatcher;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Live preview scale in percent
    pub preview_scale: u32,
    /// Directory for ad-hoc and interval captures
    pub images_path: PathBuf,
    /// Start with interval capture enabled
    pub interval_enabled: bool,
    /// Seconds between interval captures
    pub interval_secs: u64,
    /// Number of chessboard pairs collected per session
    pub chessboard_count: u32,
    /// Directory chessboard pairs are saved to
    pub chessboard_capture_path: PathBuf,
    /// Directory holding the calibration model
    pub calibration_path: PathBuf,
    pub chessboard_rows: u32,
    pub chessboard_columns: u32,
    /// Edge length of one chessboard square
    pub square_size: f32,
    /// Preview time between two saved chessboard pairs, in milliseconds
    pub chessboard_cadence_ms: u64,
    /// Give up a chessboard session after this many attempts for one pair
    pub chessboard_attempt_limit: Option<u32>,
    /// Extension (and so encoding) of saved images
    pub image_extension: String,
    /// External calibration solver
    pub calibration_program: String,
    /// Rotation of the left camera in degrees, clockwise
    pub left_rotation: f64,
    /// Rotation of the right camera in degrees, clockwise
    pub right_rotation: f64,
    /// Block matcher used for rendering
    pub block_matcher: BlockMatcher,
}

impl Default for Config {
    fn default() -> Self {
        let pictures = dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(file_names::APP_DIR);
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(file_names::APP_DIR);

        Self {
            preview_scale: DEFAULT_PREVIEW_SCALE,
            images_path: pictures.clone(),
            interval_enabled: false,
            interval_secs: constants::DEFAULT_CAPTURE_INTERVAL.as_secs(),
            chessboard_count: DEFAULT_CHESSBOARD_COUNT,
            chessboard_capture_path: pictures.join("chessboards"),
            calibration_path: data.join("calibration"),
            chessboard_rows: chessboard::ROWS,
            chessboard_columns: chessboard::COLUMNS,
            square_size: chessboard::SQUARE_SIZE,
            chessboard_cadence_ms: DEFAULT_CHESSBOARD_CADENCE.as_millis() as u64,
            chessboard_attempt_limit: None,
            image_extension: DEFAULT_IMAGE_EXTENSION.to_string(),
            calibration_program: DEFAULT_CALIBRATION_PROGRAM.to_string(),
            left_rotation: 0.0,
            right_rotation: 0.0,
            block_matcher: BlockMatcher::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(file_names::APP_DIR).join(file_names::CONFIG_FILE))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            warn!("No config directory available, using defaults");
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    }

    pub fn save_to(&self, path: &Path) -> StereoResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StereoError::write(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| StereoError::write(path, e))?;
        fs::write(path, json).map_err(|e| StereoError::write(path, e))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn chessboard_cadence(&self) -> Duration {
        Duration::from_millis(self.chessboard_cadence_ms)
    }
}
