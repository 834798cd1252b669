// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the stereo workbench

use std::fmt;
use std::path::PathBuf;

/// Result type alias using StereoError
pub type StereoResult<T> = Result<T, StereoError>;

/// Errors raised by the stereo pipeline and the capture worker
#[derive(Debug, Clone, PartialEq)]
pub enum StereoError {
    /// A capture device could not be opened (fatal at startup)
    DeviceOpen { device: String, reason: String },
    /// A frame could not be read from a device (transient)
    FrameAcquisition(String),
    /// A capture or render directory/path was empty or unusable
    InvalidPath(String),
    /// Rectification was requested without a usable calibration model
    Rectification(String),
    /// The calibration model could not be loaded from disk
    CalibrationLoad { path: PathBuf, reason: String },
    /// Writing an image or point cloud failed
    Write { path: PathBuf, reason: String },
    /// The external calibration solver reported a failure
    CalibrationFailed(String),
    /// No chessboard was found within the configured attempt limit
    ChessboardTimeout { attempts: u32 },
    /// A still image could not be decoded
    ImageLoad { path: PathBuf, reason: String },
    /// The disparity engine could not process the pair
    Disparity(String),
}

impl StereoError {
    /// Shorthand for an empty-path error on a named setting
    pub fn empty_path(what: &str) -> Self {
        StereoError::InvalidPath(format!("{} cannot be empty", what))
    }

    /// Wrap an I/O-ish failure for a specific output path
    pub fn write(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        StereoError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the loop should treat this error as a skipped iteration
    /// rather than an aborted operation
    pub fn is_transient(&self) -> bool {
        matches!(self, StereoError::FrameAcquisition(_))
    }
}

impl fmt::Display for StereoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StereoError::DeviceOpen { device, reason } => {
                write!(f, "Failed to open camera {}: {}", device, reason)
            }
            StereoError::FrameAcquisition(msg) => write!(f, "Frame acquisition failed: {}", msg),
            StereoError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            StereoError::Rectification(msg) => write!(f, "Rectification failed: {}", msg),
            StereoError::CalibrationLoad { path, reason } => write!(
                f,
                "Failed to load calibration from {}: {}",
                path.display(),
                reason
            ),
            StereoError::Write { path, reason } => {
                write!(f, "Failed to write {}: {}", path.display(), reason)
            }
            StereoError::CalibrationFailed(msg) => write!(f, "Calibration failed: {}", msg),
            StereoError::ChessboardTimeout { attempts } => write!(
                f,
                "No chessboard found in both frames after {} attempts",
                attempts
            ),
            StereoError::ImageLoad { path, reason } => {
                write!(f, "Failed to load image {}: {}", path.display(), reason)
            }
            StereoError::Disparity(msg) => write!(f, "Disparity computation failed: {}", msg),
        }
    }
}

impl std::error::Error for StereoError {}

// Conversions for I/O errors without a known path
impl From<std::io::Error> for StereoError {
    fn from(err: std::io::Error) -> Self {
        StereoError::Write {
            path: PathBuf::new(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path_message() {
        let err = StereoError::empty_path("Capture directory");
        assert_eq!(
            err.to_string(),
            "Invalid path: Capture directory cannot be empty"
        );
    }

    #[test]
    fn test_only_acquisition_is_transient() {
        assert!(StereoError::FrameAcquisition("timeout".into()).is_transient());
        assert!(!StereoError::empty_path("x").is_transient());
        assert!(!StereoError::ChessboardTimeout { attempts: 3 }.is_transient());
    }
}
