// SPDX-License-Identifier: GPL-3.0-only

//! Capture worker
//!
//! A single loop thread owns the live preview, interval capture and the
//! chessboard session. The front end talks to it through a cloneable
//! [`WorkerHandle`]: setters only touch shared settings, while one-shot
//! operations (captures, calibration, rendering) run on the caller's thread
//! under the same operation lock the loop takes for each acquisition, so
//! device and disk access never interleave.
//!
//! Loop priorities, checked at the top of every iteration:
//!
//! 1. stop requested: leave the loop
//! 2. chessboard capture requested: run a full session, then clear the request
//! 3. paused: idle for one tick
//! 4. interval capture enabled: preview until the deadline, then save a pair
//! 5. otherwise: live preview

mod state;

pub use state::{ModeCell, WorkerConfig, WorkerMode};

use crate::backends::camera::{
    CameraControl, CameraControls, CameraSide, CaptureLoopController, FramePair, FrameSource,
    LoopAction,
};
use crate::constants::{DEFAULT_CALIBRATION_PROGRAM, WORKER_TICK};
use crate::errors::{StereoError, StereoResult};
use crate::pipelines::calibrate::{CalibrationJob, Calibrator, ExternalCalibrator};
use crate::pipelines::chessboard::{ChessboardDetector, ChessGridDetector, PatternSize};
use crate::pipelines::stereo::{BlockMatcher, DisparityEngine, PointCloud, render_point_cloud};
use crate::preview::{NullPreview, PreviewSink};
use crate::storage::{capture_file_name, chessboard_file_name, save_image, validate_dir};
use chrono::Local;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resources that must never be used from two threads at once
struct Operations {
    source: Option<Box<dyn FrameSource>>,
    calibrator: Box<dyn Calibrator>,
    engine: Box<dyn DisparityEngine>,
}

/// How the most recent chessboard session ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChessboardOutcome {
    /// Every requested pair was saved
    Completed { saved: u32 },
    /// Stop or cancel arrived first
    Interrupted { saved: u32 },
    /// Aborted by `error`; the first `saved` pairs are on disk
    Failed { saved: u32, error: StereoError },
}

impl ChessboardOutcome {
    pub fn saved(&self) -> u32 {
        match self {
            Self::Completed { saved } | Self::Interrupted { saved } | Self::Failed { saved, .. } => {
                *saved
            }
        }
    }
}

impl fmt::Display for ChessboardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { saved } => write!(f, "collected {} pairs", saved),
            Self::Interrupted { saved } => write!(f, "stopped after {} pairs", saved),
            Self::Failed { saved, error } => {
                write!(f, "failed after {} pairs: {}", saved, error)
            }
        }
    }
}

/// State shared by the loop thread and every [`WorkerHandle`]
struct WorkerShared {
    settings: WorkerConfig,
    controls: Arc<CameraControls>,
    ops: Mutex<Operations>,
    stop: Arc<AtomicBool>,
    chessboard_requested: AtomicBool,
    last_session: Mutex<Option<ChessboardOutcome>>,
    paused: AtomicBool,
    mode: ModeCell,
}

impl WorkerShared {
    fn ops(&self) -> MutexGuard<'_, Operations> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_session(&self) -> MutexGuard<'_, Option<ChessboardOutcome>> {
        self.last_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// One pair from the source, under the operation lock
    fn acquire(&self) -> StereoResult<FramePair> {
        let mut ops = self.ops();
        let source = ops
            .source
            .as_mut()
            .ok_or_else(|| StereoError::FrameAcquisition("frame source released".into()))?;
        source.get_frames()
    }

    /// Save `sides` of one freshly acquired pair into the images directory
    ///
    /// The directory is checked before the device is touched, so an unset
    /// path never costs an acquisition.
    fn capture(&self, sides: &[CameraSide]) -> StereoResult<Vec<PathBuf>> {
        let dir = self.settings.images_path();
        validate_dir(&dir, "Capture directory")?;
        let extension = self.settings.image_extension();

        let pair = self.acquire()?;
        let timestamp = Local::now();
        let mut saved = Vec::with_capacity(sides.len());
        for &side in sides {
            let name = capture_file_name(side, &timestamp, &extension);
            saved.push(save_image(pair.get(side), &dir, &name)?);
        }
        info!(count = saved.len(), dir = %dir.display(), "Captured images");
        Ok(saved)
    }

    /// Close the frame source; later calls do nothing
    fn release_source(&self) {
        if let Some(mut source) = self.ops().source.take() {
            info!("Releasing frame source");
            source.release();
        }
    }
}

/// Outcome of a search for one chessboard pair
enum Search {
    Found(FramePair),
    /// Stop or cancel arrived while searching
    Interrupted,
}

/// The capture loop body
///
/// Build one with [`CaptureWorker::new`], hand out [`WorkerHandle`]s with
/// [`CaptureWorker::handle`], then either [`spawn`](CaptureWorker::spawn)
/// it or drive it with [`step`](CaptureWorker::step).
pub struct CaptureWorker {
    shared: Arc<WorkerShared>,
    preview: Box<dyn PreviewSink>,
    detector: Box<dyn ChessboardDetector>,
    interval_deadline: Option<Instant>,
    preview_closed: bool,
}

impl CaptureWorker {
    pub fn new(source: Box<dyn FrameSource>, settings: WorkerConfig) -> Self {
        let controls = Arc::clone(source.controls());
        let shared = WorkerShared {
            settings,
            controls,
            ops: Mutex::new(Operations {
                source: Some(source),
                calibrator: Box::new(ExternalCalibrator::new(DEFAULT_CALIBRATION_PROGRAM)),
                engine: Box::new(BlockMatcher::default()),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            chessboard_requested: AtomicBool::new(false),
            last_session: Mutex::new(None),
            paused: AtomicBool::new(false),
            mode: ModeCell::new(WorkerMode::LivePreview),
        };

        Self {
            shared: Arc::new(shared),
            preview: Box::new(NullPreview),
            detector: Box::new(ChessGridDetector::default()),
            interval_deadline: None,
            preview_closed: false,
        }
    }

    pub fn with_preview(mut self, preview: Box<dyn PreviewSink>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn ChessboardDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_calibrator(self, calibrator: Box<dyn Calibrator>) -> Self {
        self.shared.ops().calibrator = calibrator;
        self
    }

    pub fn with_disparity_engine(self, engine: Box<dyn DisparityEngine>) -> Self {
        self.shared.ops().engine = engine;
        self
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the loop on its own thread
    pub fn spawn(self) -> RunningWorker {
        let handle = self.handle();
        let stop = Arc::clone(&self.shared.stop);
        let mut worker = self;
        let controller =
            CaptureLoopController::start("capture-worker", stop, move || worker.step());
        RunningWorker {
            handle,
            controller: Some(controller),
        }
    }

    /// One loop iteration
    pub fn step(&mut self) -> LoopAction {
        let shared = Arc::clone(&self.shared);

        if shared.is_stopped() {
            shared.mode.store(WorkerMode::Idle);
            self.close_preview();
            return LoopAction::Stop;
        }

        if shared.chessboard_requested.load(Ordering::SeqCst) {
            shared.mode.store(WorkerMode::ChessboardCapture);
            let outcome = self.run_chessboard_session();
            match &outcome {
                ChessboardOutcome::Failed { saved, error } => {
                    warn!(saved, %error, "Chessboard session aborted")
                }
                other => info!(saved = other.saved(), "Chessboard session ended: {}", other),
            }
            // Published before the request clears so pollers see it
            *shared.last_session() = Some(outcome);
            shared.chessboard_requested.store(false, Ordering::SeqCst);
            self.interval_deadline = None;
            return LoopAction::Continue;
        }

        if shared.paused.load(Ordering::Acquire) {
            shared.mode.store(WorkerMode::Idle);
            self.interval_deadline = None;
            thread::sleep(WORKER_TICK);
            return LoopAction::Continue;
        }

        if shared.settings.interval_enabled() {
            shared.mode.store(WorkerMode::IntervalCapture);
            let now = Instant::now();
            let deadline = *self
                .interval_deadline
                .get_or_insert(now + shared.settings.interval());
            if now >= deadline {
                self.interval_deadline = None;
                if let Err(e) = shared.capture(&CameraSide::BOTH) {
                    warn!(error = %e, "Interval capture failed");
                }
            } else {
                self.preview_once();
            }
            return LoopAction::Continue;
        }

        self.interval_deadline = None;
        shared.mode.store(WorkerMode::LivePreview);
        self.preview_once();
        LoopAction::Continue
    }

    /// Acquire and display one pair, pacing the loop to at most one
    /// iteration per tick
    fn preview_once(&mut self) {
        let started = Instant::now();
        match self.shared.acquire() {
            Ok(pair) => self.preview.show(&pair, self.shared.settings.scale()),
            Err(e) => debug!(error = %e, "Skipping preview frame"),
        }
        let elapsed = started.elapsed();
        if elapsed < WORKER_TICK {
            thread::sleep(WORKER_TICK - elapsed);
        }
    }

    /// Keep previewing for `duration`; false if interrupted
    fn preview_for(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.interrupted() {
                return false;
            }
            self.preview_once();
        }
        true
    }

    fn interrupted(&self) -> bool {
        self.shared.is_stopped() || !self.shared.chessboard_requested.load(Ordering::SeqCst)
    }

    fn run_chessboard_session(&mut self) -> ChessboardOutcome {
        let mut saved = 0;
        match self.collect_chessboards(&mut saved) {
            Ok(true) => ChessboardOutcome::Completed { saved },
            Ok(false) => ChessboardOutcome::Interrupted { saved },
            Err(error) => ChessboardOutcome::Failed { saved, error },
        }
    }

    /// Collect the configured number of chessboard pairs, counting them in
    /// `saved`; false when interrupted
    fn collect_chessboards(&mut self, saved: &mut u32) -> StereoResult<bool> {
        let settings = &self.shared.settings;
        let dir = settings.chessboard_path();
        validate_dir(&dir, "Chessboard capture directory")?;

        let total = settings.chessboard_count();
        let pattern = settings.pattern();
        let extension = settings.image_extension();
        let limit = settings.attempt_limit();
        let cadence = settings.cadence();
        info!(
            total,
            rows = pattern.rows,
            columns = pattern.columns,
            dir = %dir.display(),
            "Starting chessboard session"
        );

        for index in 1..=total {
            let pair = match self.find_chessboard_pair(pattern, limit)? {
                Search::Found(pair) => pair,
                Search::Interrupted => return Ok(false),
            };

            for side in CameraSide::BOTH {
                let name = chessboard_file_name(side, index, total, &extension);
                save_image(pair.get(side), &dir, &name)?;
            }
            *saved = index;
            info!(index, total, "Saved chessboard pair");

            if index < total && !self.preview_for(cadence) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Acquire pairs until both sides show the pattern
    fn find_chessboard_pair(
        &mut self,
        pattern: PatternSize,
        limit: Option<u32>,
    ) -> StereoResult<Search> {
        let mut attempts = 0u32;
        loop {
            if self.interrupted() {
                return Ok(Search::Interrupted);
            }
            if let Some(limit) = limit
                && attempts >= limit
            {
                return Err(StereoError::ChessboardTimeout { attempts });
            }
            attempts += 1;

            let pair = match self.shared.acquire() {
                Ok(pair) => pair,
                Err(e) if e.is_transient() => {
                    debug!(attempts, error = %e, "Skipping chessboard attempt");
                    thread::sleep(WORKER_TICK);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.preview.show(&pair, self.shared.settings.scale());

            // Both sides are always inspected
            let left = self.detector.find(&pair.left, pattern);
            let right = self.detector.find(&pair.right, pattern);
            if left && right {
                debug!(attempts, "Chessboard visible in both frames");
                return Ok(Search::Found(pair));
            }
        }
    }

    fn close_preview(&mut self) {
        if !self.preview_closed {
            self.preview_closed = true;
            self.preview.close();
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.close_preview();
    }
}

/// Front-end side of the worker
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub fn mode(&self) -> WorkerMode {
        self.shared.mode.load()
    }

    pub fn settings(&self) -> &WorkerConfig {
        &self.shared.settings
    }

    pub fn controls(&self) -> &Arc<CameraControls> {
        &self.shared.controls
    }

    /// Rotation in degrees, clockwise; applies from the next pair
    pub fn set_rotation(&self, side: CameraSide, degrees: f64) {
        self.shared.controls.set_rotation(side, degrees);
    }

    pub fn set_property(&self, side: CameraSide, control: CameraControl, value: f64) {
        self.shared.controls.set_property(side, control, value);
    }

    pub fn set_scale(&self, percent: u32) {
        self.shared.settings.set_scale(percent);
    }

    pub fn set_interval_enabled(&self, enabled: bool) {
        self.shared.settings.set_interval_enabled(enabled);
    }

    pub fn set_interval(&self, interval: Duration) {
        self.shared.settings.set_interval(interval);
    }

    pub fn set_chessboard_count(&self, count: u32) {
        self.shared.settings.set_chessboard_count(count);
    }

    pub fn set_chessboard_capture_path(&self, path: impl AsRef<Path>) {
        self.shared.settings.set_chessboard_path(path.as_ref());
    }

    pub fn set_calibration_path(&self, path: impl AsRef<Path>) {
        self.shared.settings.set_calibration_path(path.as_ref());
    }

    pub fn set_images_path(&self, path: impl AsRef<Path>) {
        self.shared.settings.set_images_path(path.as_ref());
    }

    pub fn set_chessboard_pattern(&self, pattern: PatternSize) {
        self.shared.settings.set_pattern(pattern);
    }

    pub fn set_square_size(&self, size: f32) {
        self.shared.settings.set_square_size(size);
    }

    pub fn set_chessboard_cadence(&self, cadence: Duration) {
        self.shared.settings.set_cadence(cadence);
    }

    pub fn set_chessboard_attempt_limit(&self, limit: Option<u32>) {
        self.shared.settings.set_attempt_limit(limit);
    }

    /// Request a chessboard session; `false` cancels a pending or running one
    ///
    /// A new request forgets the previous session's outcome.
    pub fn set_capture_chessboards(&self, capture: bool) {
        if capture {
            *self.shared.last_session() = None;
        }
        self.shared
            .chessboard_requested
            .store(capture, Ordering::SeqCst);
    }

    /// Outcome of the last finished chessboard session
    pub fn last_chessboard_outcome(&self) -> Option<ChessboardOutcome> {
        self.shared.last_session().clone()
    }

    pub fn chessboard_requested(&self) -> bool {
        self.shared.chessboard_requested.load(Ordering::SeqCst)
    }

    /// Suspend acquisition without stopping the worker
    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Save one side of a fresh pair into the images directory
    pub fn capture_image(&self, side: CameraSide) -> StereoResult<PathBuf> {
        let mut saved = self.shared.capture(&[side])?;
        saved
            .pop()
            .ok_or_else(|| StereoError::FrameAcquisition("nothing captured".into()))
    }

    /// Save both sides of one fresh pair with a shared timestamp
    pub fn capture_both(&self) -> StereoResult<(PathBuf, PathBuf)> {
        let mut saved = self.shared.capture(&CameraSide::BOTH)?.into_iter();
        match (saved.next(), saved.next()) {
            (Some(left), Some(right)) => Ok((left, right)),
            _ => Err(StereoError::FrameAcquisition("nothing captured".into())),
        }
    }

    /// Solve calibration from the captured chessboard pairs
    ///
    /// Blocks until the solver finishes; the loop does not acquire
    /// meanwhile.
    pub fn calibrate(&self) -> StereoResult<()> {
        let settings = &self.shared.settings;
        let job = CalibrationJob::prepare(
            &settings.chessboard_path(),
            &settings.calibration_path(),
            settings.pattern(),
            settings.square_size(),
        )?;

        let mut ops = self.shared.ops();
        info!(
            pairs = job.image_pairs.len(),
            output = %job.output_dir.display(),
            "Calibrating"
        );
        ops.calibrator.calibrate(&job)
    }

    /// Render a point cloud from two stills with the saved calibration
    pub fn render(
        &self,
        left: impl AsRef<Path>,
        right: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> StereoResult<PointCloud> {
        let calibration = self.shared.settings.calibration_path();
        let ops = self.shared.ops();
        let cloud = render_point_cloud(
            &calibration,
            left.as_ref(),
            right.as_ref(),
            output.as_ref(),
            ops.engine.as_ref(),
        )?;
        info!(points = cloud.len(), output = %output.as_ref().display(), "Rendered point cloud");
        Ok(cloud)
    }

    /// Ask the loop to exit after its current iteration
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Close the frame source; later acquisitions fail
    pub fn release(&self) {
        self.shared.release_source();
    }
}

/// A worker running on its own thread
///
/// Dropping it stops the loop, joins the thread and releases the devices.
pub struct RunningWorker {
    handle: WorkerHandle,
    controller: Option<CaptureLoopController>,
}

impl RunningWorker {
    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.controller
            .as_ref()
            .is_some_and(CaptureLoopController::is_running)
    }

    /// Stop the loop, wait for it, then release the devices exactly once
    pub fn shutdown(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            info!("Shutting down capture worker");
            controller.stop();
        }
        self.handle.shared.mode.store(WorkerMode::Idle);
        self.handle.release();
    }
}

impl Drop for RunningWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::DualDeviceSource;
    use crate::backends::camera::still::StillImageDevice;
    use image::RgbImage;

    fn still_worker() -> CaptureWorker {
        let controls = Arc::new(CameraControls::new());
        let source = DualDeviceSource::new(
            Box::new(StillImageDevice::from_image("left", RgbImage::new(8, 6))),
            Box::new(StillImageDevice::from_image("right", RgbImage::new(8, 6))),
            controls,
        );
        CaptureWorker::new(Box::new(source), WorkerConfig::default())
    }

    struct RecordingPreview(Arc<Mutex<Vec<(u32, u32)>>>);

    impl PreviewSink for RecordingPreview {
        fn show(&mut self, pair: &FramePair, _scale: u32) {
            self.0.lock().unwrap().push(pair.left.dimensions());
        }
    }

    #[test]
    fn test_live_preview_by_default() {
        let shown = Arc::new(Mutex::new(Vec::new()));
        let mut worker =
            still_worker().with_preview(Box::new(RecordingPreview(Arc::clone(&shown))));
        assert_eq!(worker.step(), LoopAction::Continue);
        assert_eq!(worker.handle().mode(), WorkerMode::LivePreview);
        assert_eq!(shown.lock().unwrap().as_slice(), &[(8, 6)]);
    }

    #[test]
    fn test_paused_is_idle_without_acquisition() {
        let shown = Arc::new(Mutex::new(Vec::new()));
        let mut worker =
            still_worker().with_preview(Box::new(RecordingPreview(Arc::clone(&shown))));
        worker.handle().set_paused(true);
        worker.step();
        assert_eq!(worker.handle().mode(), WorkerMode::Idle);
        assert!(shown.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_ends_loop() {
        let mut worker = still_worker();
        worker.handle().stop();
        assert_eq!(worker.step(), LoopAction::Stop);
        assert_eq!(worker.handle().mode(), WorkerMode::Idle);
    }

    #[test]
    fn test_chessboard_request_has_priority_and_clears() {
        let mut worker = still_worker();
        let handle = worker.handle();
        handle.set_interval_enabled(true);
        handle.set_capture_chessboards(true);
        // No directory configured: the session fails fast and the request clears
        worker.step();
        assert!(!handle.chessboard_requested());
        assert!(matches!(
            handle.last_chessboard_outcome(),
            Some(ChessboardOutcome::Failed {
                saved: 0,
                error: StereoError::InvalidPath(_)
            })
        ));

        handle.set_capture_chessboards(true);
        assert_eq!(handle.last_chessboard_outcome(), None);
    }

    #[test]
    fn test_released_source_fails_acquisition() {
        let worker = still_worker();
        let handle = worker.handle();
        handle.release();
        handle.release();
        let dir = tempfile::tempdir().unwrap();
        handle.set_images_path(dir.path());
        assert!(matches!(
            handle.capture_image(CameraSide::Left),
            Err(StereoError::FrameAcquisition(_))
        ));
    }

    #[test]
    fn test_capture_image_saves_one_side() {
        let worker = still_worker();
        let handle = worker.handle();
        let dir = tempfile::tempdir().unwrap();
        handle.set_images_path(dir.path());

        let path = handle.capture_image(CameraSide::Right).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Right_"), "{}", name);
        assert!(name.ends_with(".png"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_worker_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureWorker>();
        assert_send::<WorkerHandle>();
    }
}
