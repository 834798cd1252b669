// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture worker

use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use stereo_workbench::backends::camera::{
    CameraControl, CameraControls, CaptureDevice, DualDeviceSource, FramePair, LoopAction,
};
use stereo_workbench::pipelines::calibrate::{CalibrationJob, Calibrator};
use stereo_workbench::pipelines::chessboard::{ChessboardDetector, PatternSize};
use stereo_workbench::preview::PreviewSink;
use stereo_workbench::{
    CameraSide, CaptureWorker, ChessboardOutcome, RunningWorker, StereoError, StereoResult,
    WorkerConfig, WorkerHandle, WorkerMode,
};

/// Device whose frames carry the number of reads so far in every pixel
struct CountingDevice {
    name: String,
    reads: Arc<AtomicU32>,
    releases: Arc<AtomicU32>,
    released: bool,
}

impl CaptureDevice for CountingDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_frame(&mut self) -> StereoResult<RgbImage> {
        if self.released {
            return Err(StereoError::FrameAcquisition("released".into()));
        }
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RgbImage::from_pixel(4, 4, Rgb([n.min(255) as u8, 0, 0])))
    }

    fn set_control(&mut self, _control: CameraControl, _value: f64) -> StereoResult<()> {
        Ok(())
    }

    fn control(&self, _control: CameraControl) -> Option<f64> {
        None
    }

    fn release(&mut self) {
        self.released = true;
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
struct Counters {
    reads: Arc<AtomicU32>,
    releases: Arc<AtomicU32>,
}

impl Counters {
    fn device(&self, name: &str) -> Box<dyn CaptureDevice> {
        Box::new(CountingDevice {
            name: name.to_string(),
            reads: Arc::clone(&self.reads),
            releases: Arc::clone(&self.releases),
            released: false,
        })
    }

    fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Sees a chessboard once a frame's counter reaches `from_read`
struct ThresholdDetector {
    from_read: u8,
}

impl ChessboardDetector for ThresholdDetector {
    fn find(&mut self, frame: &RgbImage, _pattern: PatternSize) -> bool {
        frame.get_pixel(0, 0)[0] >= self.from_read
    }
}

struct NeverDetector;

impl ChessboardDetector for NeverDetector {
    fn find(&mut self, _frame: &RgbImage, _pattern: PatternSize) -> bool {
        false
    }
}

struct CountingPreview(Arc<AtomicU32>);

impl PreviewSink for CountingPreview {
    fn show(&mut self, _pair: &FramePair, _scale: u32) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Left and right devices each count their own reads
fn counting_worker() -> (CaptureWorker, Counters, Counters) {
    let left = Counters::default();
    let right = Counters::default();
    let source = DualDeviceSource::new(
        left.device("left"),
        right.device("right"),
        Arc::new(CameraControls::new()),
    );
    let settings = WorkerConfig::default();
    settings.set_cadence(Duration::ZERO);
    (
        CaptureWorker::new(Box::new(source), settings),
        left,
        right,
    )
}

/// Poll `condition` for up to five seconds
fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn test_chessboard_saved_after_third_attempt() {
    let (worker, left, right) = counting_worker();
    let mut worker = worker.with_detector(Box::new(ThresholdDetector { from_read: 3 }));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_chessboard_capture_path(dir.path());
    handle.set_chessboard_count(1);
    handle.set_capture_chessboards(true);

    assert_eq!(worker.step(), LoopAction::Continue);

    assert_eq!(left.reads(), 3);
    assert_eq!(right.reads(), 3);
    assert_eq!(file_names(dir.path()), vec!["left_1.png", "right_1.png"]);
    assert!(!handle.chessboard_requested());
    assert_eq!(
        handle.last_chessboard_outcome(),
        Some(ChessboardOutcome::Completed { saved: 1 })
    );
    assert_eq!(handle.mode(), WorkerMode::ChessboardCapture);

    // Back to live preview on the next iteration
    worker.step();
    assert_eq!(handle.mode(), WorkerMode::LivePreview);
}

#[test]
fn test_chessboard_index_padding_follows_count() {
    let (worker, _, _) = counting_worker();
    let mut worker = worker.with_detector(Box::new(ThresholdDetector { from_read: 0 }));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_chessboard_capture_path(dir.path());

    handle.set_chessboard_count(12);
    handle.set_capture_chessboards(true);
    worker.step();
    let names = file_names(dir.path());
    assert_eq!(names.len(), 24);
    assert!(names.contains(&"left_03.png".to_string()));
    assert!(names.contains(&"right_12.png".to_string()));

    let wide = tempfile::tempdir().unwrap();
    handle.set_chessboard_capture_path(wide.path());
    handle.set_chessboard_count(100);
    handle.set_capture_chessboards(true);
    worker.step();
    let names = file_names(wide.path());
    assert_eq!(names.len(), 200);
    assert!(names.contains(&"right_007.png".to_string()));
    assert!(names.contains(&"left_100.png".to_string()));
}

#[test]
fn test_chessboard_attempt_limit_aborts_session() {
    let (worker, left, _) = counting_worker();
    let mut worker = worker.with_detector(Box::new(ThresholdDetector { from_read: 255 }));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_chessboard_capture_path(dir.path());
    handle.set_chessboard_count(2);
    handle.set_chessboard_attempt_limit(Some(5));
    handle.set_capture_chessboards(true);

    worker.step();

    assert_eq!(left.reads(), 5);
    assert!(file_names(dir.path()).is_empty());
    assert!(!handle.chessboard_requested());
    assert_eq!(
        handle.last_chessboard_outcome(),
        Some(ChessboardOutcome::Failed {
            saved: 0,
            error: StereoError::ChessboardTimeout { attempts: 5 }
        })
    );
}

/// Spawned worker searching for chessboards it will never find
fn searching_worker(dir: &Path) -> (RunningWorker, WorkerHandle, Counters) {
    let (worker, left, _) = counting_worker();
    let worker = worker.with_detector(Box::new(NeverDetector));
    let handle = worker.handle();
    handle.set_chessboard_capture_path(dir);
    handle.set_chessboard_count(3);
    handle.set_capture_chessboards(true);
    let running = worker.spawn();
    wait_for("search to start", || left.reads() > 0);
    assert_eq!(handle.mode(), WorkerMode::ChessboardCapture);
    (running, handle, left)
}

#[test]
fn test_cancel_ends_running_search() {
    let dir = tempfile::tempdir().unwrap();
    let (mut running, handle, _) = searching_worker(dir.path());

    handle.set_capture_chessboards(false);
    wait_for("session outcome", || handle.last_chessboard_outcome().is_some());

    assert_eq!(
        handle.last_chessboard_outcome(),
        Some(ChessboardOutcome::Interrupted { saved: 0 })
    );
    wait_for("live preview", || handle.mode() == WorkerMode::LivePreview);
    assert!(running.is_running());
    assert!(file_names(dir.path()).is_empty());
    running.shutdown();
}

#[test]
fn test_stop_ends_running_search() {
    let dir = tempfile::tempdir().unwrap();
    let (mut running, handle, left) = searching_worker(dir.path());

    handle.stop();
    running.shutdown();

    assert_eq!(
        handle.last_chessboard_outcome(),
        Some(ChessboardOutcome::Interrupted { saved: 0 })
    );
    assert!(!running.is_running());
    assert_eq!(left.releases(), 1);
    assert!(file_names(dir.path()).is_empty());
}

#[test]
fn test_cancel_during_cadence_keeps_saved_pairs() {
    let (worker, _, _) = counting_worker();
    let worker = worker.with_detector(Box::new(ThresholdDetector { from_read: 0 }));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_chessboard_capture_path(dir.path());
    handle.set_chessboard_count(3);
    handle.set_chessboard_cadence(Duration::from_secs(60));
    handle.set_capture_chessboards(true);
    let mut running = worker.spawn();

    wait_for("first pair", || file_names(dir.path()).len() == 2);
    handle.set_capture_chessboards(false);
    wait_for("session outcome", || handle.last_chessboard_outcome().is_some());

    assert_eq!(
        handle.last_chessboard_outcome(),
        Some(ChessboardOutcome::Interrupted { saved: 1 })
    );
    assert_eq!(file_names(dir.path()), vec!["left_1.png", "right_1.png"]);
    running.shutdown();
}

/// Holds the operation lock until released through the barrier
struct GateCalibrator(Arc<Barrier>);

impl Calibrator for GateCalibrator {
    fn calibrate(&mut self, _job: &CalibrationJob) -> StereoResult<()> {
        self.0.wait();
        self.0.wait();
        Ok(())
    }
}

#[test]
fn test_calibration_holds_off_acquisition() {
    let gate = Arc::new(Barrier::new(2));
    let (worker, left, _) = counting_worker();
    let worker = worker.with_calibrator(Box::new(GateCalibrator(Arc::clone(&gate))));
    let handle = worker.handle();
    let chessboards = tempfile::tempdir().unwrap();
    for name in ["left_1.png", "right_1.png"] {
        RgbImage::new(2, 2).save(chessboards.path().join(name)).unwrap();
    }
    handle.set_chessboard_capture_path(chessboards.path());
    handle.set_calibration_path(chessboards.path().join("calibration"));

    let mut running = worker.spawn();
    wait_for("live preview", || left.reads() > 0);

    let calibrating = {
        let handle = handle.clone();
        thread::spawn(move || handle.calibrate())
    };
    // The calibrator is now running with the operation lock held
    gate.wait();
    let reads_during = left.reads();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(left.reads(), reads_during);
    assert_eq!(running.handle().mode(), WorkerMode::LivePreview);

    gate.wait();
    calibrating.join().unwrap().unwrap();
    wait_for("preview to resume", || left.reads() > reads_during);
    running.shutdown();
}

#[test]
fn test_chessboard_empty_directory_never_acquires() {
    let (mut worker, left, _) = counting_worker();
    let handle = worker.handle();
    handle.set_capture_chessboards(true);

    worker.step();

    assert_eq!(left.reads(), 0);
    assert!(!handle.chessboard_requested());
}

#[test]
fn test_interval_zero_captures_immediately() {
    let shown = Arc::new(AtomicU32::new(0));
    let (worker, left, _) = counting_worker();
    let mut worker = worker.with_preview(Box::new(CountingPreview(Arc::clone(&shown))));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_images_path(dir.path());
    handle.set_interval(Duration::ZERO);
    handle.set_interval_enabled(true);

    worker.step();

    assert_eq!(handle.mode(), WorkerMode::IntervalCapture);
    assert_eq!(shown.load(Ordering::SeqCst), 0);
    assert_eq!(left.reads(), 1);
    let names = file_names(dir.path());
    assert_eq!(names.len(), 2);
    assert!(names[0].starts_with("Left_") && names[0].ends_with(".png"));
    assert!(names[1].starts_with("Right_"));
}

#[test]
fn test_interval_previews_until_deadline() {
    let shown = Arc::new(AtomicU32::new(0));
    let (worker, _, _) = counting_worker();
    let mut worker = worker.with_preview(Box::new(CountingPreview(Arc::clone(&shown))));
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_images_path(dir.path());
    handle.set_interval(Duration::from_secs(3600));
    handle.set_interval_enabled(true);

    worker.step();
    worker.step();

    assert_eq!(shown.load(Ordering::SeqCst), 2);
    assert!(file_names(dir.path()).is_empty());
}

#[test]
fn test_capture_with_empty_directory_is_rejected_before_acquisition() {
    let (worker, left, right) = counting_worker();
    let handle = worker.handle();

    let err = handle.capture_both().unwrap_err();
    assert_eq!(err, StereoError::empty_path("Capture directory"));
    assert!(matches!(
        handle.capture_image(CameraSide::Left),
        Err(StereoError::InvalidPath(_))
    ));
    assert_eq!(left.reads(), 0);
    assert_eq!(right.reads(), 0);
}

#[test]
fn test_capture_both_shares_one_pair() {
    let (worker, left, right) = counting_worker();
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    handle.set_images_path(dir.path());

    let (left_path, right_path) = handle.capture_both().unwrap();

    assert_eq!(left.reads(), 1);
    assert_eq!(right.reads(), 1);
    let stamp = |p: &Path| {
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        name.split_once('_').unwrap().1.to_string()
    };
    assert_eq!(stamp(&left_path), stamp(&right_path));
}

#[test]
fn test_stop_releases_devices_exactly_once() {
    let (worker, left, right) = counting_worker();
    let mut running = worker.spawn();

    let deadline = Instant::now() + Duration::from_secs(5);
    while left.reads() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(left.reads() > 0, "worker never acquired");

    running.handle().stop();
    running.shutdown();
    let reads_at_stop = left.reads();
    assert!(!running.is_running());
    assert_eq!(running.handle().mode(), WorkerMode::Idle);

    running.shutdown();
    drop(running);
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(left.releases(), 1);
    assert_eq!(right.releases(), 1);
    assert_eq!(left.reads(), reads_at_stop);
}

#[test]
fn test_rotation_applies_to_next_pair() {
    let shown = Arc::new(Mutex::new(Vec::new()));

    struct Sizes(Arc<Mutex<Vec<(u32, u32)>>>);
    impl PreviewSink for Sizes {
        fn show(&mut self, pair: &FramePair, _scale: u32) {
            self.0.lock().unwrap().push(pair.right.dimensions());
        }
    }

    let left = Counters::default();
    let right = Counters::default();
    let source = DualDeviceSource::new(
        left.device("left"),
        right.device("right"),
        Arc::new(CameraControls::new()),
    );
    let mut worker = CaptureWorker::new(Box::new(source), WorkerConfig::default())
        .with_preview(Box::new(Sizes(Arc::clone(&shown))));
    let handle = worker.handle();

    worker.step();
    handle.set_rotation(CameraSide::Right, 45.0);
    worker.step();

    let sizes = shown.lock().unwrap();
    assert_eq!(sizes[0], (4, 4));
    assert_eq!(sizes[1], (5, 5));
}

#[derive(Clone, Default)]
struct RecordingCalibrator {
    jobs: Arc<Mutex<Vec<CalibrationJob>>>,
}

impl Calibrator for RecordingCalibrator {
    fn calibrate(&mut self, job: &CalibrationJob) -> StereoResult<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

#[test]
fn test_calibrate_hands_pairs_to_calibrator() {
    let calibrator = RecordingCalibrator::default();
    let (worker, _, _) = counting_worker();
    let worker = worker.with_calibrator(Box::new(calibrator.clone()));
    let handle = worker.handle();

    let chessboards = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    for name in ["left_1.png", "right_1.png", "left_2.png", "right_2.png"] {
        RgbImage::new(2, 2).save(chessboards.path().join(name)).unwrap();
    }
    handle.set_chessboard_capture_path(chessboards.path());
    handle.set_calibration_path(output.path());
    handle.set_chessboard_pattern(PatternSize::new(7, 5));

    handle.calibrate().unwrap();

    let jobs = calibrator.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].image_pairs.len(), 2);
    assert_eq!(jobs[0].pattern, PatternSize::new(7, 5));
    assert_eq!(jobs[0].output_dir, output.path());
}

#[test]
fn test_calibrate_without_paths_is_invalid() {
    let (worker, _, _) = counting_worker();
    let handle = worker.handle();
    assert!(matches!(handle.calibrate(), Err(StereoError::InvalidPath(_))));
}

#[test]
fn test_render_without_calibration_path_is_invalid() {
    let (worker, _, _) = counting_worker();
    let handle = worker.handle();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("cloud.ply");

    let result = handle.render(dir.path().join("l.png"), dir.path().join("r.png"), &output);

    assert!(matches!(result, Err(StereoError::InvalidPath(_))));
    assert!(!output.exists());
}
