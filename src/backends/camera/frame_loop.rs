// SPDX-License-Identifier: GPL-3.0-only
//! Dedicated thread for the capture worker loop
//!
//! The body is called repeatedly until it answers [`LoopAction::Stop`] or the
//! stop flag goes up. The flag belongs to the caller, so a long step (a
//! chessboard session, a timed preview) can poll it too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// What the loop does after one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// Call `step` until it stops or `stop` is raised, returning how many steps ran
///
/// The flag is checked before every step, so a flag raised ahead of time
/// means the body never runs.
pub fn run_loop<F>(name: &str, stop: &AtomicBool, mut step: F) -> u64
where
    F: FnMut() -> LoopAction,
{
    let mut steps = 0u64;
    while !stop.load(Ordering::SeqCst) {
        steps += 1;
        if step() == LoopAction::Stop {
            debug!(name, steps, "Loop body finished");
            return steps;
        }
    }
    debug!(name, steps, "Loop stopped by flag");
    steps
}

/// Owner of a running loop thread
///
/// Dropping the controller raises the flag and joins the thread.
pub struct CaptureLoopController {
    name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<u64>>,
}

impl CaptureLoopController {
    /// Start `step` on a thread called `name`
    ///
    /// If the thread cannot be spawned the failure is logged and the
    /// controller reports itself as not running.
    pub fn start<F>(name: &str, stop: Arc<AtomicBool>, step: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let flag = Arc::clone(&stop);
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&thread_name, &flag, step))
            .inspect(|_| info!(name, "Loop thread started"))
            .inspect_err(|e| error!(name, error = %e, "Cannot spawn loop thread"))
            .ok();

        Self {
            name: name.to_string(),
            stop,
            thread,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&self.thread, Some(thread) if !thread.is_finished())
    }

    /// Raise the flag and wait, returning the number of steps that ran
    pub fn stop(&mut self) -> Option<u64> {
        self.stop.store(true, Ordering::SeqCst);
        self.join()
    }

    /// Wait for the thread without touching the flag
    ///
    /// `None` once joined, or if the body panicked.
    pub fn join(&mut self) -> Option<u64> {
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(steps) => {
                info!(name = %self.name, steps, "Loop thread joined");
                Some(steps)
            }
            Err(_) => {
                error!(name = %self.name, "Loop thread panicked");
                None
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_body_stops_loop() {
        let stop = AtomicBool::new(false);
        let mut remaining = 3;
        let steps = run_loop("countdown", &stop, || {
            remaining -= 1;
            if remaining == 0 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });
        assert_eq!(steps, 3);
    }

    #[test]
    fn test_raised_flag_skips_body() {
        let stop = AtomicBool::new(true);
        let steps = run_loop("stopped", &stop, || panic!("body must not run"));
        assert_eq!(steps, 0);
    }

    #[test]
    fn test_thread_stops_on_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut controller = CaptureLoopController::start("spin", Arc::clone(&stop), || {
            thread::sleep(Duration::from_millis(2));
            LoopAction::Continue
        });
        thread::sleep(Duration::from_millis(20));
        assert!(controller.is_running());

        let steps = controller.stop();
        assert!(steps.is_some_and(|n| n > 0));
        assert!(stop.load(Ordering::SeqCst));
        assert!(!controller.is_running());
        assert_eq!(controller.join(), None);
    }

    #[test]
    fn test_panicking_body() {
        let mut controller =
            CaptureLoopController::start("panics", Arc::new(AtomicBool::new(false)), || {
                panic!("boom")
            });
        assert_eq!(controller.join(), None);
    }
}
