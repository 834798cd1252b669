// SPDX-License-Identifier: GPL-3.0-only

//! Worker mode and live-tunable settings
//!
//! Every setting is written by the front end and read by the worker loop on
//! its next iteration. Scalars are atomics; paths and strings sit behind
//! short-lived locks that are never held across device or disk I/O.

use crate::config::Config;
use crate::pipelines::chessboard::PatternSize;
use crate::constants::{
    DEFAULT_CAPTURE_INTERVAL, DEFAULT_CHESSBOARD_CADENCE, DEFAULT_CHESSBOARD_COUNT,
    DEFAULT_IMAGE_EXTENSION, DEFAULT_PREVIEW_SCALE, chessboard,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// What the worker loop is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerMode {
    /// Acquiring and displaying pairs continuously
    LivePreview = 0,
    /// Previewing while counting down to the next dual capture
    IntervalCapture = 1,
    /// Searching for and saving chessboard pairs
    ChessboardCapture = 2,
    /// Paused or stopped; no acquisition
    Idle = 3,
}

impl WorkerMode {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerMode::LivePreview,
            1 => WorkerMode::IntervalCapture,
            2 => WorkerMode::ChessboardCapture,
            _ => WorkerMode::Idle,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WorkerMode::LivePreview => "Live preview",
            WorkerMode::IntervalCapture => "Interval capture",
            WorkerMode::ChessboardCapture => "Chessboard capture",
            WorkerMode::Idle => "Idle",
        }
    }
}

impl std::fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lock-free cell holding the current [`WorkerMode`]
#[derive(Debug)]
pub struct ModeCell(AtomicU8);

impl ModeCell {
    pub fn new(mode: WorkerMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn load(&self) -> WorkerMode {
        WorkerMode::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, mode: WorkerMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

fn read_path(lock: &RwLock<PathBuf>) -> PathBuf {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write_path(lock: &RwLock<PathBuf>, path: &Path) {
    *lock.write().unwrap_or_else(PoisonError::into_inner) = path.to_path_buf();
}

/// Settings shared between the front end and the worker loop
#[derive(Debug)]
pub struct WorkerConfig {
    scale: AtomicU32,
    interval_enabled: AtomicBool,
    interval_ms: AtomicU64,
    images_path: RwLock<PathBuf>,
    chessboard_count: AtomicU32,
    chessboard_path: RwLock<PathBuf>,
    calibration_path: RwLock<PathBuf>,
    rows: AtomicU32,
    columns: AtomicU32,
    square_size: AtomicU32,
    cadence_ms: AtomicU64,
    /// Zero means unbounded
    attempt_limit: AtomicU32,
    image_extension: RwLock<String>,
}

impl Default for WorkerConfig {
    /// Built-in defaults with every directory unset
    fn default() -> Self {
        Self {
            scale: AtomicU32::new(DEFAULT_PREVIEW_SCALE),
            interval_enabled: AtomicBool::new(false),
            interval_ms: AtomicU64::new(DEFAULT_CAPTURE_INTERVAL.as_millis() as u64),
            images_path: RwLock::new(PathBuf::new()),
            chessboard_count: AtomicU32::new(DEFAULT_CHESSBOARD_COUNT),
            chessboard_path: RwLock::new(PathBuf::new()),
            calibration_path: RwLock::new(PathBuf::new()),
            rows: AtomicU32::new(chessboard::ROWS),
            columns: AtomicU32::new(chessboard::COLUMNS),
            square_size: AtomicU32::new(chessboard::SQUARE_SIZE.to_bits()),
            cadence_ms: AtomicU64::new(DEFAULT_CHESSBOARD_CADENCE.as_millis() as u64),
            attempt_limit: AtomicU32::new(0),
            image_extension: RwLock::new(DEFAULT_IMAGE_EXTENSION.to_string()),
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        let settings = Self::default();
        settings.set_scale(config.preview_scale);
        settings.set_interval_enabled(config.interval_enabled);
        settings.set_interval(config.interval());
        settings.set_images_path(&config.images_path);
        settings.set_chessboard_count(config.chessboard_count);
        settings.set_chessboard_path(&config.chessboard_capture_path);
        settings.set_calibration_path(&config.calibration_path);
        settings.set_pattern(PatternSize::new(
            config.chessboard_rows,
            config.chessboard_columns,
        ));
        settings.set_square_size(config.square_size);
        settings.set_cadence(config.chessboard_cadence());
        settings.set_attempt_limit(config.chessboard_attempt_limit);
        settings.set_image_extension(&config.image_extension);
        settings
    }
}

impl WorkerConfig {
    /// Preview scale in percent, at least 1
    pub fn scale(&self) -> u32 {
        self.scale.load(Ordering::Relaxed)
    }

    pub fn set_scale(&self, percent: u32) {
        self.scale.store(percent.max(1), Ordering::Relaxed);
    }

    pub fn interval_enabled(&self) -> bool {
        self.interval_enabled.load(Ordering::Acquire)
    }

    pub fn set_interval_enabled(&self, enabled: bool) {
        self.interval_enabled.store(enabled, Ordering::Release);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn images_path(&self) -> PathBuf {
        read_path(&self.images_path)
    }

    pub fn set_images_path(&self, path: &Path) {
        write_path(&self.images_path, path);
    }

    pub fn chessboard_count(&self) -> u32 {
        self.chessboard_count.load(Ordering::Relaxed)
    }

    pub fn set_chessboard_count(&self, count: u32) {
        self.chessboard_count.store(count, Ordering::Relaxed);
    }

    pub fn chessboard_path(&self) -> PathBuf {
        read_path(&self.chessboard_path)
    }

    pub fn set_chessboard_path(&self, path: &Path) {
        write_path(&self.chessboard_path, path);
    }

    pub fn calibration_path(&self) -> PathBuf {
        read_path(&self.calibration_path)
    }

    pub fn set_calibration_path(&self, path: &Path) {
        write_path(&self.calibration_path, path);
    }

    pub fn pattern(&self) -> PatternSize {
        PatternSize::new(
            self.rows.load(Ordering::Relaxed),
            self.columns.load(Ordering::Relaxed),
        )
    }

    pub fn set_pattern(&self, pattern: PatternSize) {
        self.rows.store(pattern.rows, Ordering::Relaxed);
        self.columns.store(pattern.columns, Ordering::Relaxed);
    }

    pub fn square_size(&self) -> f32 {
        f32::from_bits(self.square_size.load(Ordering::Relaxed))
    }

    pub fn set_square_size(&self, size: f32) {
        self.square_size.store(size.to_bits(), Ordering::Relaxed);
    }

    /// Preview time between two saved chessboard pairs
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.load(Ordering::Relaxed))
    }

    pub fn set_cadence(&self, cadence: Duration) {
        self.cadence_ms
            .store(cadence.as_millis() as u64, Ordering::Relaxed);
    }

    /// Attempts allowed per chessboard pair, `None` when unbounded
    pub fn attempt_limit(&self) -> Option<u32> {
        match self.attempt_limit.load(Ordering::Relaxed) {
            0 => None,
            limit => Some(limit),
        }
    }

    pub fn set_attempt_limit(&self, limit: Option<u32>) {
        self.attempt_limit
            .store(limit.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn image_extension(&self) -> String {
        self.image_extension
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_image_extension(&self, extension: &str) {
        *self
            .image_extension
            .write()
            .unwrap_or_else(PoisonError::into_inner) = extension.trim_start_matches('.').to_string();
    }
}
