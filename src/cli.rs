// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for workbench operations
//!
//! This module provides command-line functionality for:
//! - Running the interactive terminal workbench
//! - One-shot and chessboard captures
//! - Calibrating from captured chessboards
//! - Rendering a point cloud from a stereo pair

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stereo_workbench::backends::camera::{
    CameraControls, CameraSide, FrameSource, StereoDeviceConfig, open_device, open_frame_source,
};
use stereo_workbench::config::Config;
use stereo_workbench::pipelines::calibrate::{CalibrationJob, Calibrator, ExternalCalibrator};
use stereo_workbench::pipelines::stereo::{
    CalibrationModel, RectifiedPair, StereoCalibration, render_point_cloud,
};
use stereo_workbench::preview::{NullPreview, PreviewSink};
use stereo_workbench::terminal::{self, TerminalPreview};
use stereo_workbench::worker::{
    CaptureWorker, ChessboardOutcome, RunningWorker, WorkerConfig, WorkerHandle,
};
use tracing::info;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Device selection shared by the commands that touch cameras
#[derive(clap::Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Left camera: index, /dev/videoN, or an image file
    #[arg(short, long, default_value = "0")]
    pub left: String,

    /// Right camera; the same value as --left selects split-frame mode
    #[arg(short, long, default_value = "1")]
    pub right: String,
}

impl DeviceArgs {
    /// `/dev/video0` on the left, `/dev/video1` on the right
    pub fn default_rig() -> Self {
        Self {
            left: "0".to_string(),
            right: "1".to_string(),
        }
    }
}

/// Open the rig and build a worker seeded from `config`
fn build_worker(
    devices: &DeviceArgs,
    config: &Config,
    rectify: bool,
    preview: Box<dyn PreviewSink>,
) -> CliResult<CaptureWorker> {
    let controls = Arc::new(CameraControls::new());
    controls.set_rotation(CameraSide::Left, config.left_rotation);
    controls.set_rotation(CameraSide::Right, config.right_rotation);

    let device_config = StereoDeviceConfig::new(&devices.left, &devices.right);
    let mut source: Box<dyn FrameSource> =
        open_frame_source(&device_config, controls, &mut |id| open_device(id))?;
    info!(
        left = %devices.left,
        right = %devices.right,
        split = source.is_split_frame(),
        "Opened stereo rig"
    );

    if rectify {
        let calibration: Arc<dyn CalibrationModel> =
            Arc::new(StereoCalibration::load(&config.calibration_path)?);
        source = Box::new(RectifiedPair::new(source, Some(calibration)));
    }

    Ok(
        CaptureWorker::new(source, WorkerConfig::from(config))
            .with_preview(preview)
            .with_calibrator(Box::new(ExternalCalibrator::new(&config.calibration_program)))
            .with_disparity_engine(Box::new(config.block_matcher.clone())),
    )
}

/// Raise the worker's stop flag on Ctrl+C
fn install_stop_handler(handle: &WorkerHandle) -> CliResult {
    let handle = handle.clone();
    ctrlc::set_handler(move || handle.stop())?;
    Ok(())
}

/// Run the interactive terminal workbench
pub fn workbench(devices: &DeviceArgs, config: &Config, rectify: bool) -> CliResult {
    let (preview, frames) = TerminalPreview::new();
    let worker = build_worker(devices, config, rectify, Box::new(preview))?;
    let mut running = worker.spawn();
    install_stop_handler(running.handle())?;

    let result = terminal::run(running.handle().clone(), frames);
    running.shutdown();
    result
}

/// Capture one side or both into `output` (or the configured directory)
pub fn capture(
    devices: &DeviceArgs,
    config: &Config,
    side: Option<CameraSide>,
    output: Option<PathBuf>,
) -> CliResult {
    let worker = build_worker(devices, config, false, Box::new(NullPreview))?;
    let handle = worker.handle();
    if let Some(dir) = output {
        handle.set_images_path(dir);
    }

    let saved = match side {
        Some(side) => vec![handle.capture_image(side)?],
        None => {
            let (left, right) = handle.capture_both()?;
            vec![left, right]
        }
    };
    handle.release();

    for path in saved {
        println!("Saved: {}", path.display());
    }
    Ok(())
}

/// Collect chessboard pairs without the terminal preview
pub fn chessboards(
    devices: &DeviceArgs,
    config: &Config,
    count: Option<u32>,
    output: Option<PathBuf>,
) -> CliResult {
    let worker = build_worker(devices, config, false, Box::new(NullPreview))?;
    let handle = worker.handle();
    if let Some(count) = count {
        handle.set_chessboard_count(count);
    }
    if let Some(dir) = output {
        handle.set_chessboard_capture_path(dir);
    }
    let dir = handle.settings().chessboard_path();
    let total = handle.settings().chessboard_count();

    handle.set_capture_chessboards(true);
    let mut running: RunningWorker = worker.spawn();
    install_stop_handler(running.handle())?;

    println!(
        "Collecting {} chessboard pairs into {} (Ctrl+C to stop)",
        total,
        dir.display()
    );
    let start = Instant::now();
    while handle.chessboard_requested() && !handle.is_stopped() {
        std::thread::sleep(Duration::from_millis(100));
    }
    running.shutdown();
    let elapsed = start.elapsed().as_secs();

    match handle.last_chessboard_outcome() {
        Some(ChessboardOutcome::Failed { saved, error }) => {
            eprintln!("Chessboard capture failed after {} pairs ({}s)", saved, elapsed);
            Err(error.into())
        }
        Some(outcome) => {
            println!("Chessboard capture {} ({}s)", outcome, elapsed);
            Ok(())
        }
        None => {
            println!("Chessboard capture stopped before it started");
            Ok(())
        }
    }
}

/// Solve calibration from a chessboard directory
pub fn calibrate(config: &Config, input: Option<PathBuf>, output: Option<PathBuf>) -> CliResult {
    let settings = WorkerConfig::from(config);
    let input = input.unwrap_or_else(|| settings.chessboard_path());
    let output = output.unwrap_or_else(|| settings.calibration_path());

    let job = CalibrationJob::prepare(
        &input,
        &output,
        settings.pattern(),
        settings.square_size(),
    )?;
    println!(
        "Calibrating from {} pairs in {}",
        job.image_pairs.len(),
        input.display()
    );

    ExternalCalibrator::new(&config.calibration_program).calibrate(&job)?;
    println!("Calibration saved to {}", output.display());
    Ok(())
}

/// Render a stereo pair into a point cloud file
pub fn render(
    config: &Config,
    calibration: Option<PathBuf>,
    left: PathBuf,
    right: PathBuf,
    output: PathBuf,
) -> CliResult {
    let calibration = calibration.unwrap_or_else(|| config.calibration_path.clone());
    let cloud = render_point_cloud(
        &calibration,
        &left,
        &right,
        &output,
        &config.block_matcher,
    )?;
    println!("Wrote {} points to {}", cloud.len(), output.display());
    Ok(())
}

/// Print the effective configuration and where it is read from
pub fn show_config(config: &Config) -> CliResult {
    match Config::path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
