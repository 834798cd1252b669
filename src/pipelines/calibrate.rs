// SPDX-License-Identifier: GPL-3.0-only

//! Calibration invocation
//!
//! Solving intrinsics and extrinsics happens in an external program. This
//! module gathers the chessboard pairs captured earlier, hands them to a
//! [`Calibrator`] and reports failures as errors.

use super::chessboard::PatternSize;
use crate::constants::file_names::CALIBRATION_FILE;
use crate::errors::{StereoError, StereoResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Everything a solver needs for one calibration run
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationJob {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Matching (left, right) chessboard images, sorted by index
    pub image_pairs: Vec<(PathBuf, PathBuf)>,
    pub pattern: PatternSize,
    pub square_size: f32,
}

impl CalibrationJob {
    /// Validate both directories and collect the captured pairs
    pub fn prepare(
        input_dir: &Path,
        output_dir: &Path,
        pattern: PatternSize,
        square_size: f32,
    ) -> StereoResult<Self> {
        if input_dir.as_os_str().is_empty() {
            return Err(StereoError::empty_path("Chessboard capture directory"));
        }
        if output_dir.as_os_str().is_empty() {
            return Err(StereoError::empty_path("Calibration directory"));
        }

        let image_pairs = find_chessboard_pairs(input_dir)?;
        if image_pairs.is_empty() {
            return Err(StereoError::CalibrationFailed(format!(
                "no left/right chessboard pairs in {}",
                input_dir.display()
            )));
        }

        Ok(Self {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            image_pairs,
            pattern,
            square_size,
        })
    }
}

/// Solver for stereo calibration
pub trait Calibrator: Send {
    /// Run the solver; on success the output directory holds a model that
    /// the pipeline can load
    fn calibrate(&mut self, job: &CalibrationJob) -> StereoResult<()>;
}

/// Pair `left_<suffix>` with `right_<suffix>` files in `dir`
pub fn find_chessboard_pairs(dir: &Path) -> StereoResult<Vec<(PathBuf, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        StereoError::InvalidPath(format!("cannot read {}: {}", dir.display(), e))
    })?;

    let mut lefts: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(suffix) = name.strip_prefix("left_") {
            lefts.push((suffix.to_string(), path.clone()));
        }
    }
    lefts.sort();

    let pairs: Vec<_> = lefts
        .into_iter()
        .filter_map(|(suffix, left)| {
            let right = dir.join(format!("right_{}", suffix));
            if right.is_file() {
                Some((left, right))
            } else {
                debug!(left = %left.display(), "No matching right image");
                None
            }
        })
        .collect();
    Ok(pairs)
}

/// Runs an external calibration program
///
/// The program is called as
/// `<program> --rows R --columns C --square-size S <input_dir> <output_dir>`
/// and must leave `stereo_calibration.json` in the output directory.
#[derive(Debug, Clone)]
pub struct ExternalCalibrator {
    program: String,
}

impl ExternalCalibrator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, job: &CalibrationJob) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--rows")
            .arg(job.pattern.rows.to_string())
            .arg("--columns")
            .arg(job.pattern.columns.to_string())
            .arg("--square-size")
            .arg(job.square_size.to_string())
            .arg(&job.input_dir)
            .arg(&job.output_dir);
        command
    }
}

impl Calibrator for ExternalCalibrator {
    fn calibrate(&mut self, job: &CalibrationJob) -> StereoResult<()> {
        fs::create_dir_all(&job.output_dir).map_err(|e| StereoError::write(&job.output_dir, e))?;

        info!(
            program = %self.program,
            pairs = job.image_pairs.len(),
            input = %job.input_dir.display(),
            output = %job.output_dir.display(),
            "Running calibration"
        );

        let output = self.command(job).output().map_err(|e| {
            StereoError::CalibrationFailed(format!("cannot run {}: {}", self.program, e))
        })?;

        if output.status.success() {
            let model = job.output_dir.join(CALIBRATION_FILE);
            if !model.is_file() {
                warn!(model = %model.display(), "Calibration program wrote no model");
                return Err(StereoError::CalibrationFailed(format!(
                    "{} exited successfully but {} is missing",
                    self.program,
                    model.display()
                )));
            }
            info!(model = %model.display(), "Calibration finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, %stderr, "Calibration program failed");
            Err(StereoError::CalibrationFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_pairs_matched_by_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["left_02.png", "right_02.png", "left_01.png", "right_01.png", "left_03.png"] {
            touch(dir.path(), name);
        }

        let pairs = find_chessboard_pairs(dir.path()).unwrap();
        let names: Vec<_> = pairs
            .iter()
            .map(|(l, r)| {
                (
                    l.file_name().unwrap().to_string_lossy().into_owned(),
                    r.file_name().unwrap().to_string_lossy().into_owned(),
                )
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("left_01.png".to_string(), "right_01.png".to_string()),
                ("left_02.png".to_string(), "right_02.png".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_input_dir_rejected() {
        let err = CalibrationJob::prepare(Path::new(""), Path::new("/tmp"), PatternSize::new(6, 9), 1.0)
            .unwrap_err();
        assert!(matches!(err, StereoError::InvalidPath(_)));
    }

    #[test]
    fn test_command_line() {
        let job = CalibrationJob {
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
            image_pairs: vec![],
            pattern: PatternSize::new(6, 9),
            square_size: 0.5571,
        };
        let command = ExternalCalibrator::new("calibrate_cameras").command(&job);
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["--rows", "6", "--columns", "9", "--square-size", "0.5571", "in", "out"]
        );
    }

    fn job_in(dir: &Path) -> CalibrationJob {
        CalibrationJob {
            input_dir: dir.to_path_buf(),
            output_dir: dir.join("out"),
            image_pairs: vec![],
            pattern: PatternSize::new(6, 9),
            square_size: 1.0,
        }
    }

    #[test]
    fn test_missing_program_is_calibration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExternalCalibrator::new("/nonexistent/calibrate_cameras")
            .calibrate(&job_in(dir.path()))
            .unwrap_err();
        assert!(matches!(err, StereoError::CalibrationFailed(_)));
    }

    #[test]
    fn test_success_without_model_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let err = ExternalCalibrator::new("true").calibrate(&job).unwrap_err();
        assert!(matches!(err, StereoError::CalibrationFailed(_)));
        assert!(!job.output_dir.join(CALIBRATION_FILE).exists());
    }

    #[test]
    fn test_success_with_model() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        fs::create_dir_all(&job.output_dir).unwrap();
        touch(&job.output_dir, CALIBRATION_FILE);
        ExternalCalibrator::new("true").calibrate(&job).unwrap();
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        fs::create_dir_all(&job.output_dir).unwrap();
        touch(&job.output_dir, CALIBRATION_FILE);
        let err = ExternalCalibrator::new("false").calibrate(&job).unwrap_err();
        assert!(matches!(err, StereoError::CalibrationFailed(_)));
    }
}
