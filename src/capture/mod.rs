//! The `capture` module produces the frames snapsolve analyzes: live grabs of
//! the primary monitor, or images loaded from disk, plus the batch queue that
//! collects several frames of one question.

use image::DynamicImage;
use std::path::{Path, PathBuf};

use crate::codec::CodecError;

pub mod queue;
pub mod screen;

pub use queue::ScreenshotQueue;
pub use screen::ScreenCapture;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no monitors found")]
    NoMonitor,
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error("cannot encode screenshot: {0}")]
    Encode(#[from] CodecError),
    #[error("cannot write screenshot {path}: {source}")]
    Save {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot load image {path}: {source}")]
    Load {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// One captured image and where it was saved, if saving is enabled.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: DynamicImage,
    pub saved_path: Option<PathBuf>,
}

impl CapturedFrame {
    pub fn new(image: DynamicImage, saved_path: Option<PathBuf>) -> Self {
        Self { image, saved_path }
    }

    /// Load an image file as a frame; the file itself is the saved path.
    pub fn from_file(path: &Path) -> Result<Self, CaptureError> {
        let image = image::open(path).map_err(|source| CaptureError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(image, Some(path.to_path_buf())))
    }
}
