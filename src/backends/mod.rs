// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for stereo capture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │      Capture worker / pipelines      │
//! └──────────────────┬───────────────────┘
//!                    │ FramePair
//! ┌──────────────────┴───────────────────┐
//! │  FrameSource (dual or split-frame)   │
//! └──────────────────┬───────────────────┘
//!                    │ RgbImage
//! ┌──────────────────┴───────────────────┐
//! │  CaptureDevice (V4L2, still image)   │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Capture devices, stereo frame sources and loop threading

pub mod camera;
