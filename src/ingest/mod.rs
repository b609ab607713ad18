//! Frame sources for the capture loop.
//!
//! - Synthetic scenes (`stub://...`) for tests and bench runs
//! - Still images, re-read as a frame each iteration
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! A source failing to produce a frame is fatal to the capture loop; sources
//! never retry internally.

pub mod camera;
mod still;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource, CameraStats};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Anything the capture loop can pull frames from.
pub trait FrameSource {
    /// Capture the next frame. An error ends the capture loop.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;

    /// Whether the source is still delivering frames on time.
    fn is_healthy(&self) -> bool {
        true
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
