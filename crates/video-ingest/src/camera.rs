//! OpenCV-backed single-frame capture.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use chrono::Utc;
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, info, warn};

use crate::{
    ImageSource,
    reclaim::DeviceReclaimer,
    types::{CaptureError, CapturedImage},
};

/// Frames read and discarded before the kept one so auto exposure settles.
const WARMUP_FRAMES: usize = 5;

/// Captures through OpenCV's V4L backend.
pub struct OpenCvSnapshot {
    device: PathBuf,
    size: (i32, i32),
    reclaimer: DeviceReclaimer,
    capture: Option<VideoCapture>,
}

impl OpenCvSnapshot {
    pub fn new(device: impl Into<PathBuf>, size: (i32, i32)) -> Self {
        Self {
            device: device.into(),
            size,
            reclaimer: DeviceReclaimer::default(),
            capture: None,
        }
    }

    pub fn with_reclaimer(mut self, reclaimer: DeviceReclaimer) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    fn open(&self) -> Result<VideoCapture, CaptureError> {
        let uri = self.device.display().to_string();
        if let Some(index) = parse_device_index(&uri) {
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) if cap.is_opened().unwrap_or(false) => return Ok(cap),
                    Ok(_) => {}
                    Err(err) => warn!("failed to open device #{index} with backend {backend}: {err}"),
                }
            }
        }
        Err(CaptureError::Open { uri })
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stripped.parse::<i32>().ok()
}

impl ImageSource for OpenCvSnapshot {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.reclaimer.reclaim(&self.device);
        let mut cap = self.open()?;
        let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, f64::from(self.size.0));
        let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, f64::from(self.size.1));
        self.capture = Some(cap);
        debug!(device = %self.device.display(), "camera acquired");
        Ok(())
    }

    fn capture(&mut self, path: &Path) -> Result<CapturedImage, CaptureError> {
        let cap = self.capture.as_mut().ok_or(CaptureError::NotAcquired)?;

        let mut frame = Mat::default();
        for _ in 0..=WARMUP_FRAMES {
            let grabbed = cap
                .read(&mut frame)
                .map_err(|e| CaptureError::Other(e.into()))?;
            if !grabbed {
                return Err(CaptureError::Open {
                    uri: self.device.display().to_string(),
                });
            }
        }

        let target = path.to_string_lossy();
        let written = imgcodecs::imwrite(&target, &frame, &Vector::new())
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !written {
            return Err(CaptureError::Backend {
                status: "imwrite returned false".to_string(),
                stderr: String::new(),
            });
        }

        let file = File::open(path)?;
        file.sync_all()?;
        let bytes = file.metadata()?.len();
        info!(path = %path.display(), bytes, "frame captured");
        Ok(CapturedImage {
            path: path.to_path_buf(),
            bytes,
            captured_at: Utc::now(),
        })
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.capture.take() {
            if let Err(err) = cap.release() {
                warn!("failed to release camera: {err}");
            }
            debug!(device = %self.device.display(), "camera released");
        }
    }
}

impl Drop for OpenCvSnapshot {
    fn drop(&mut self) {
        self.release();
    }
}
