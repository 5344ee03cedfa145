//! Classifier sessions answer "which class is this image" for a file on disk.
//!
//! A session loads its model once at construction; every later query only
//! pays for inference. Backends:
//! - `command`: runs an external inference program per image.
//! - `torch`: TorchScript module through `tch` (feature `with-tch`).

mod command;
pub mod preprocess;
#[cfg(feature = "with-tch")]
mod torch;

pub use command::CommandClassifier;
#[cfg(feature = "with-tch")]
pub use torch::TorchClassifier;

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("model {0:?} does not exist")]
    MissingModel(PathBuf),
    #[error("failed to load model {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("failed to decode image {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to launch classifier {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("classifier exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("classifier output {0:?} is not a class id")]
    Parse(String),
    #[error("classifier reported failure code {0}")]
    Sentinel(i32),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Model loaded once, queried per captured image.
pub trait Classifier: Send {
    /// Returns a non-negative class id.
    fn classify(&mut self, image: &Path) -> Result<i32, ClassifyError>;
}

/// Map a raw backend result onto the error contract: negative ids are
/// failure sentinels.
pub(crate) fn class_from_raw(raw: i64) -> Result<i32, ClassifyError> {
    let id = i32::try_from(raw).map_err(|_| ClassifyError::Parse(raw.to_string()))?;
    if id < 0 {
        return Err(ClassifyError::Sentinel(id));
    }
    Ok(id)
}
