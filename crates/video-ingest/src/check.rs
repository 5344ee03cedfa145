//! Sanity checks on a captured file before it is handed to the classifier.

use std::{
    fs::File,
    io::Read,
    path::Path,
};

use crate::CaptureError;

const JPEG_MAGIC: [u8; 2] = [0xFF, 0xD8];

/// Minimum size and magic-byte check for captured frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageCheck {
    pub min_bytes: u64,
    pub require_jpeg: bool,
}

impl Default for ImageCheck {
    fn default() -> Self {
        Self {
            min_bytes: 100,
            require_jpeg: true,
        }
    }
}

impl ImageCheck {
    /// Returns the file size when the file passes.
    pub fn verify(&self, path: &Path) -> Result<u64, CaptureError> {
        let mut file = File::open(path)?;
        let bytes = file.metadata()?.len();
        if bytes < self.min_bytes {
            return Err(CaptureError::TooSmall {
                path: path.to_path_buf(),
                bytes,
                min_bytes: self.min_bytes,
            });
        }

        if self.require_jpeg {
            let mut header = [0u8; 2];
            file.read_exact(&mut header)?;
            if header != JPEG_MAGIC {
                return Err(CaptureError::BadHeader {
                    path: path.to_path_buf(),
                    header: header.to_vec(),
                });
            }
        }
        Ok(bytes)
    }
}
