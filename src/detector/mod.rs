mod blazeface;

pub use blazeface::BlazeFaceDetector;

use crate::{bounding_box::Detection, frame::Frame};
use parking_lot::Mutex;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("ONNX Runtime error: {0}")]
    OrtError(#[from] ort::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
    #[error("Unsupported frame: {0}")]
    UnsupportedFrame(String),
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Finds faces in a frame.
///
/// Returns normalized boxes at or above the configured confidence, in the order
/// they should be drawn. An empty result is the common case, not an error.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Lets one long-lived detector be shared by successive streams.
impl<D: FaceDetector + ?Sized> FaceDetector for Arc<Mutex<D>> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.lock().detect(frame)
    }
}
