//! Camera capture for the inspection cell.
//!
//! A capture session is single use: acquire the device (reclaiming it from
//! any stale holder first), write one frame to disk, release. Backends:
//! - `ffmpeg`: spawns `ffmpeg` against a V4L2 device.
//! - `camera`: OpenCV `VideoCapture` (feature `with-opencv`).

pub mod check;
mod ffmpeg;
mod reclaim;
mod types;

#[cfg(feature = "with-opencv")]
mod camera;

#[cfg(feature = "with-opencv")]
pub use camera::OpenCvSnapshot;
pub use check::ImageCheck;
pub use ffmpeg::{DEFAULT_CAPTURE_TIMEOUT, FfmpegSnapshot};
pub use reclaim::{DeviceReclaimer, find_device_holders};
pub use types::{CaptureError, CapturedImage};

use std::path::Path;

/// Exclusive single-frame image source.
pub trait ImageSource: Send {
    /// Take ownership of the device. Implementations reclaim the device from
    /// stale holders before opening it.
    fn acquire(&mut self) -> Result<(), CaptureError>;
    /// Capture one frame to `path`. The file is flushed to storage on success.
    fn capture(&mut self, path: &Path) -> Result<CapturedImage, CaptureError>;
    /// Give the device back. Releasing an idle source is a no-op.
    fn release(&mut self);
}
