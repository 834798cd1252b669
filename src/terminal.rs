// SPDX-License-Identifier: GPL-3.0-only

//! Terminal workbench
//!
//! Renders the left and right previews side by side with Unicode half-block
//! characters and maps keys to worker operations.

use crate::backends::camera::{CameraSide, FramePair};
use crate::preview::{PreviewSink, scale_pair};
use crate::worker::{ChessboardOutcome, WorkerHandle};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use image::RgbImage;
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    style::Style, widgets::Widget,
};
use std::io::{self, stdout};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Latest pair handed over from the worker thread
pub type SharedFrame = Arc<Mutex<Option<FramePair>>>;

/// Preview sink that parks the newest scaled pair for the UI thread
pub struct TerminalPreview {
    latest: SharedFrame,
}

impl TerminalPreview {
    pub fn new() -> (Self, SharedFrame) {
        let latest = SharedFrame::default();
        (
            Self {
                latest: Arc::clone(&latest),
            },
            latest,
        )
    }
}

impl PreviewSink for TerminalPreview {
    fn show(&mut self, pair: &FramePair, scale: u32) {
        let scaled = scale_pair(pair, scale);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(scaled);
    }

    fn close(&mut self) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

const SCALE_STEP: u32 = 10;
const ROTATION_STEP: f64 = 90.0;

/// Run the workbench until the user quits or the worker stops
pub fn run(handle: WorkerHandle, frames: SharedFrame) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &handle, &frames);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyAction {
    Quit,
    CaptureSide(CameraSide),
    CaptureBoth,
    ToggleInterval,
    ToggleChessboards,
    Calibrate,
    TogglePause,
    Scale(i32),
    Rotate(CameraSide, f64),
    ToggleHelp,
}

fn map_key(key: &KeyEvent) -> Option<KeyAction> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(KeyAction::Quit);
    }
    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Quit,
        KeyCode::Char('l') => KeyAction::CaptureSide(CameraSide::Left),
        KeyCode::Char('r') => KeyAction::CaptureSide(CameraSide::Right),
        KeyCode::Char('b') | KeyCode::Char(' ') => KeyAction::CaptureBoth,
        KeyCode::Char('i') => KeyAction::ToggleInterval,
        KeyCode::Char('c') => KeyAction::ToggleChessboards,
        KeyCode::Char('k') => KeyAction::Calibrate,
        KeyCode::Char('p') => KeyAction::TogglePause,
        KeyCode::Char('+') | KeyCode::Char('=') => KeyAction::Scale(SCALE_STEP as i32),
        KeyCode::Char('-') => KeyAction::Scale(-(SCALE_STEP as i32)),
        KeyCode::Char('[') => KeyAction::Rotate(CameraSide::Left, -ROTATION_STEP),
        KeyCode::Char(']') => KeyAction::Rotate(CameraSide::Left, ROTATION_STEP),
        KeyCode::Char('{') => KeyAction::Rotate(CameraSide::Right, -ROTATION_STEP),
        KeyCode::Char('}') => KeyAction::Rotate(CameraSide::Right, ROTATION_STEP),
        KeyCode::Char('h') | KeyCode::Char('?') => KeyAction::ToggleHelp,
        _ => return None,
    };
    Some(action)
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    handle: &WorkerHandle,
    frames: &SharedFrame,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut widget = PairWidget::default();
    let mut show_help = false;
    let mut status_message = String::new();
    let mut shown_outcome: Option<ChessboardOutcome> = None;
    let (status_tx, status_rx): (Sender<String>, Receiver<String>) = mpsc::channel();

    loop {
        if handle.is_stopped() {
            info!("Worker stopped, leaving workbench");
            break;
        }

        if let Some(pair) = frames.lock().unwrap_or_else(PoisonError::into_inner).take() {
            widget.update(pair);
        }
        while let Ok(message) = status_rx.try_recv() {
            status_message = message;
        }
        let outcome = handle.last_chessboard_outcome();
        if outcome != shown_outcome {
            if let Some(outcome) = &outcome {
                status_message = format!("Chessboards {}", outcome);
            }
            shown_outcome = outcome;
        }

        let status = if show_help {
            help_message()
        } else {
            status_line(handle, &status_message)
        };

        terminal.draw(|f| {
            let area = f.area();
            let preview_area = Rect {
                height: area.height.saturating_sub(1),
                ..area
            };
            f.render_widget(&widget, preview_area);

            let status_area = Rect {
                y: area.y + area.height.saturating_sub(1),
                height: 1,
                ..area
            };
            f.render_widget(StatusBar { message: &status }, status_area);
        })?;

        if event::poll(Duration::from_millis(16))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && let Some(action) = map_key(&key)
        {
            if action != KeyAction::ToggleHelp {
                show_help = false;
            }
            match action {
                KeyAction::Quit => break,
                KeyAction::ToggleHelp => show_help = !show_help,
                other => status_message = apply(handle, other, &status_tx),
            }
        }
    }

    Ok(())
}

/// Perform `action` and describe the result for the status bar
fn apply(handle: &WorkerHandle, action: KeyAction, status_tx: &Sender<String>) -> String {
    match action {
        KeyAction::CaptureSide(side) => {
            let worker = handle.clone();
            in_background("capture", status_tx, "Capturing...", move || {
                match worker.capture_image(side) {
                    Ok(path) => format!("Saved: {}", path.display()),
                    Err(e) => report(e),
                }
            })
        }
        KeyAction::CaptureBoth => {
            let worker = handle.clone();
            in_background("capture", status_tx, "Capturing...", move || {
                match worker.capture_both() {
                    Ok((left, _)) => format!("Saved pair: {}", left.display()),
                    Err(e) => report(e),
                }
            })
        }
        KeyAction::ToggleInterval => {
            let enabled = !handle.settings().interval_enabled();
            handle.set_interval_enabled(enabled);
            format!(
                "Interval capture {} ({}s)",
                if enabled { "on" } else { "off" },
                handle.settings().interval().as_secs()
            )
        }
        KeyAction::ToggleChessboards => {
            let requested = !handle.chessboard_requested();
            handle.set_capture_chessboards(requested);
            if requested {
                format!(
                    "Collecting {} chessboard pairs",
                    handle.settings().chessboard_count()
                )
            } else {
                "Chessboard capture cancelled".to_string()
            }
        }
        KeyAction::Calibrate => {
            let worker = handle.clone();
            in_background("calibration", status_tx, "Calibrating...", move || {
                match worker.calibrate() {
                    Ok(()) => "Calibration finished".to_string(),
                    Err(e) => report(e),
                }
            })
        }
        KeyAction::TogglePause => {
            let paused = !handle.is_paused();
            handle.set_paused(paused);
            if paused { "Paused" } else { "Resumed" }.to_string()
        }
        KeyAction::Scale(delta) => {
            let scale = (handle.settings().scale() as i32 + delta).clamp(10, 400) as u32;
            handle.set_scale(scale);
            format!("Scale {}%", scale)
        }
        KeyAction::Rotate(side, delta) => {
            let degrees = (handle.controls().rotation(side) + delta).rem_euclid(360.0);
            handle.set_rotation(side, degrees);
            format!("{} rotated to {}°", side, degrees)
        }
        KeyAction::Quit | KeyAction::ToggleHelp => String::new(),
    }
}

/// Run `job` on a named helper thread, which sends its status line back
/// when done
///
/// Operations wait on the worker's operation lock, so they never run on the
/// UI thread.
fn in_background<F>(name: &str, status_tx: &Sender<String>, pending: &str, job: F) -> String
where
    F: FnOnce() -> String + Send + 'static,
{
    let tx = status_tx.clone();
    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        // The UI may already be gone
        let _ = tx.send(job());
    });
    match spawned {
        Ok(_) => pending.to_string(),
        Err(e) => format!("Error: {}", e),
    }
}

fn report(e: crate::errors::StereoError) -> String {
    error!(error = %e, "Workbench operation failed");
    format!("Error: {}", e)
}

fn status_line(handle: &WorkerHandle, message: &str) -> String {
    let mut line = format!("[{}] {}%", handle.mode(), handle.settings().scale());
    if !message.is_empty() {
        line.push_str(" | ");
        line.push_str(message);
    }
    line.push_str(" | 'h' help | 'q' quit");
    line
}

fn help_message() -> String {
    "l/r: Capture side | b: Capture both | i: Interval | c: Chessboards | k: Calibrate | \
     p: Pause | +/-: Scale | [ ]: Rotate left | { }: Rotate right | q: Quit"
        .to_string()
}

/// Left and right previews side by side
#[derive(Default)]
struct PairWidget {
    pair: Option<FramePair>,
}

impl PairWidget {
    fn update(&mut self, pair: FramePair) {
        self.pair = Some(pair);
    }
}

impl Widget for &PairWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Some(pair) = &self.pair else {
            let msg = "Waiting for cameras...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, Style::default());
            }
            return;
        };

        let half = area.width / 2;
        let left_area = Rect { width: half, ..area };
        let right_area = Rect {
            x: area.x + half,
            width: area.width - half,
            ..area
        };
        render_half_blocks(&pair.left, left_area, buf);
        render_half_blocks(&pair.right, right_area, buf);
    }
}

/// Draw `image` into `area`, two vertical pixels per cell, keeping aspect
fn render_half_blocks(image: &RgbImage, area: Rect, buf: &mut Buffer) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || area.width == 0 || area.height == 0 {
        return;
    }

    let (display_width, display_height) = fit(width, height, area.width, area.height);
    if display_width == 0 || display_height == 0 {
        return;
    }

    let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
    let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;
    let x_scale = width as f64 / display_width as f64;
    let y_scale = height as f64 / (display_height as f64 * 2.0);

    for ty in 0..display_height {
        for tx in 0..display_width {
            let src_x = ((tx as f64 * x_scale) as u32).min(width - 1);
            let src_top = ((ty as f64 * 2.0 * y_scale) as u32).min(height - 1);
            let src_bottom = (((ty as f64 * 2.0 + 1.0) * y_scale) as u32).min(height - 1);

            if let Some(cell) = buf.cell_mut((x_offset + tx, y_offset + ty)) {
                cell.set_char('▀');
                cell.set_fg(color(image, src_x, src_top));
                cell.set_bg(color(image, src_x, src_bottom));
            }
        }
    }
}

/// Cell dimensions that fit a `width`x`height` image into `cols`x`rows`
fn fit(width: u32, height: u32, cols: u16, rows: u16) -> (u16, u16) {
    let aspect = width as f64 / height as f64;
    let term_width = cols as f64;
    let term_height = rows as f64 * 2.0;

    if term_width / term_height > aspect {
        let w = term_height * aspect;
        (w as u16, rows)
    } else {
        let h = term_width / aspect;
        (cols, (h / 2.0) as u16)
    }
}

fn color(image: &RgbImage, x: u32, y: u32) -> Color {
    let [r, g, b] = image.get_pixel(x, y).0;
    Color::Rgb(r, g, b)
}

/// Status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(Color::DarkGray);
            }
        }

        let text: String = self.message.chars().take(area.width as usize).collect();
        buf.set_string(
            area.x,
            area.y,
            text,
            Style::default().fg(Color::White).bg(Color::DarkGray),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_keeps_aspect() {
        // 4:3 image into a wide terminal: limited by rows
        assert_eq!(fit(640, 480, 100, 20), (53, 20));
        // Into a narrow one: limited by columns
        assert_eq!(fit(640, 480, 40, 50), (40, 15));
    }

    #[test]
    fn test_key_bindings() {
        let key = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
        assert_eq!(map_key(&key('q')), Some(KeyAction::Quit));
        assert_eq!(
            map_key(&key('l')),
            Some(KeyAction::CaptureSide(CameraSide::Left))
        );
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
        assert_eq!(map_key(&key('c')), Some(KeyAction::ToggleChessboards));
        assert_eq!(map_key(&key('x')), None);
    }

    fn blocked_handle() -> (WorkerHandle, Arc<std::sync::Barrier>, tempfile::TempDir) {
        use crate::backends::camera::still::StillImageDevice;
        use crate::backends::camera::{CameraControls, DualDeviceSource};
        use crate::pipelines::calibrate::{CalibrationJob, Calibrator};
        use crate::worker::{CaptureWorker, WorkerConfig};
        use std::sync::Barrier;

        struct GateCalibrator(Arc<Barrier>);

        impl Calibrator for GateCalibrator {
            fn calibrate(&mut self, _job: &CalibrationJob) -> crate::errors::StereoResult<()> {
                self.0.wait();
                self.0.wait();
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        for name in ["left_1.png", "right_1.png"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let source = DualDeviceSource::new(
            Box::new(StillImageDevice::from_image("left", RgbImage::new(4, 4))),
            Box::new(StillImageDevice::from_image("right", RgbImage::new(4, 4))),
            Arc::new(CameraControls::new()),
        );
        let gate = Arc::new(Barrier::new(2));
        let worker = CaptureWorker::new(Box::new(source), WorkerConfig::default())
            .with_calibrator(Box::new(GateCalibrator(Arc::clone(&gate))));
        let handle = worker.handle();
        handle.set_chessboard_capture_path(dir.path());
        handle.set_calibration_path(dir.path().join("calibration"));
        handle.set_images_path(dir.path());
        (handle, gate, dir)
    }

    #[test]
    fn test_capture_key_does_not_wait_for_calibration() {
        let (handle, gate, _dir) = blocked_handle();
        let (tx, rx) = mpsc::channel();

        assert_eq!(apply(&handle, KeyAction::Calibrate, &tx), "Calibrating...");
        // Calibrator now holds the operation lock
        gate.wait();

        assert_eq!(apply(&handle, KeyAction::CaptureBoth, &tx), "Capturing...");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        gate.wait();
        let mut messages = vec![
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        ];
        messages.sort();
        assert_eq!(messages[0], "Calibration finished");
        assert!(messages[1].starts_with("Saved pair: "), "{}", messages[1]);
    }

    #[test]
    fn test_preview_keeps_latest_scaled_pair() {
        let (mut sink, latest) = TerminalPreview::new();
        let pair = FramePair::new(RgbImage::new(20, 10), RgbImage::new(20, 10));
        sink.show(&pair, 50);
        let stored = latest.lock().unwrap().clone().unwrap();
        assert_eq!(stored.left.dimensions(), (10, 5));
        sink.close();
        assert!(latest.lock().unwrap().is_none());
    }

    #[test]
    fn test_render_fills_cells() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]));
        let area = Rect::new(0, 0, 4, 2);
        let mut buf = Buffer::empty(area);
        render_half_blocks(&image, area, &mut buf);
        let cell = buf.cell((0, 0)).unwrap();
        assert_eq!(cell.symbol(), "▀");
        assert_eq!(cell.fg, Color::Rgb(255, 0, 0));
    }
}
