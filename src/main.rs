// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Mutex;
use stereo_workbench::CameraSide;
use stereo_workbench::config::Config;
use stereo_workbench::constants::file_names;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::DeviceArgs;

#[derive(Parser)]
#[command(name = "stereo-workbench")]
#[command(about = "Stereo camera workbench: capture, calibrate, render point clouds")]
#[command(version = env!("WORKBENCH_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    /// Read settings from this file instead of the default config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Left,
    Right,
}

impl From<Side> for CameraSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => CameraSide::Left,
            Side::Right => CameraSide::Right,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive workbench in the terminal (default)
    Workbench {
        #[command(flatten)]
        devices: DeviceArgs,

        /// Preview rectified frames using the configured calibration
        #[arg(long)]
        rectify: bool,
    },

    /// Capture one pair (or one side) and exit
    Capture {
        #[command(flatten)]
        devices: DeviceArgs,

        /// Only save this camera
        #[arg(short, long, value_enum)]
        side: Option<Side>,

        /// Output directory (default: configured images directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Collect chessboard pairs for calibration
    Chessboards {
        #[command(flatten)]
        devices: DeviceArgs,

        /// Number of pairs to collect
        #[arg(short = 'n', long)]
        count: Option<u32>,

        /// Output directory (default: configured chessboard directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Calibrate from previously captured chessboard pairs
    Calibrate {
        /// Directory holding left_*/right_* chessboard images
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory the calibration is written to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a point cloud from a stereo pair (.ply, .las or .laz)
    Render {
        /// Calibration directory (default: configured calibration directory)
        #[arg(short, long)]
        calibration: Option<PathBuf>,

        /// Left image
        left: PathBuf,

        /// Right image
        right: PathBuf,

        /// Output point cloud file
        output: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, None | Some(Commands::Workbench { .. }));
    init_logging(interactive);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    match cli.command {
        None => cli::workbench(&DeviceArgs::default_rig(), &config, false),
        Some(Commands::Workbench { devices, rectify }) => {
            cli::workbench(&devices, &config, rectify)
        }
        Some(Commands::Capture {
            devices,
            side,
            output,
        }) => cli::capture(&devices, &config, side.map(CameraSide::from), output),
        Some(Commands::Chessboards {
            devices,
            count,
            output,
        }) => cli::chessboards(&devices, &config, count, output),
        Some(Commands::Calibrate { input, output }) => cli::calibrate(&config, input, output),
        Some(Commands::Render {
            calibration,
            left,
            right,
            output,
        }) => cli::render(&config, calibration, left, right, output),
        Some(Commands::Config) => cli::show_config(&config),
    }
}

/// Set RUST_LOG to control the level, e.g. RUST_LOG=debug or
/// RUST_LOG=stereo_workbench=info
///
/// The terminal workbench owns the screen, so it logs to a file in the
/// cache directory instead of stderr.
fn init_logging(interactive: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_file = interactive
        .then(|| {
            let dir = dirs::cache_dir()?.join(file_names::APP_DIR);
            std::fs::create_dir_all(&dir).ok()?;
            std::fs::File::create(dir.join("workbench.log")).ok()
        })
        .flatten();

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init(),
    }
}
