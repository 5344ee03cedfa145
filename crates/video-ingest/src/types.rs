use std::{path::PathBuf, time::Duration};

use anyhow::Error;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Frame written to disk by a capture session.
#[derive(Clone, Debug)]
pub struct CapturedImage {
    pub path: PathBuf,
    pub bytes: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("capture requested without an acquired session")]
    NotAcquired,
    #[error("capture backend exited with {status}: {stderr}")]
    Backend { status: String, stderr: String },
    #[error("{program} did not finish within {after:?}")]
    Timeout { program: String, after: Duration },
    #[error("captured image {path:?} is {bytes} bytes, expected at least {min_bytes}")]
    TooSmall {
        path: PathBuf,
        bytes: u64,
        min_bytes: u64,
    },
    #[error("captured image {path:?} has header {header:02X?}, expected JPEG")]
    BadHeader { path: PathBuf, header: Vec<u8> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] Error),
}
