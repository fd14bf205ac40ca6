use crate::{config::CameraConfig, frame::Frame};
use opencv::{core::Mat, prelude::*, videoio};
use parking_lot::Mutex;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("Capture device {0} could not be opened")]
    DeviceUnavailable(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Failed to release camera: {0}")]
    ReleaseFailed(opencv::Error),
}

/// Something that yields frames until it runs dry.
pub trait FrameSource: Send {
    /// `Ok(None)` is end of stream: the device is gone, released or out of data.
    fn acquire(&mut self) -> Result<Option<Frame>, CameraError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureTarget {
    Device(i32),
    File(PathBuf),
}

impl CaptureTarget {
    pub fn from_config(config: &CameraConfig) -> Self {
        match &config.video_file {
            Some(path) => CaptureTarget::File(path.clone()),
            None => CaptureTarget::Device(config.device_index),
        }
    }

    fn describe(&self) -> String {
        match self {
            CaptureTarget::Device(index) => format!("#{}", index),
            CaptureTarget::File(path) => format!("{:?}", path),
        }
    }
}

#[derive(Debug)]
struct CaptureState {
    capture: videoio::VideoCapture,
    released: bool,
}

/// Owns the capture device. Opened on construction, released once, on
/// `release` or drop, whichever comes first.
#[derive(Debug)]
pub struct Camera {
    target: CaptureTarget,
    state: Mutex<CaptureState>,
}

impl Camera {
    pub fn new(target: CaptureTarget) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::default().map_err(CameraError::OpenCameraFailed)?;
        let camera = Self {
            target,
            state: Mutex::new(CaptureState {
                capture,
                released: false,
            }),
        };
        camera.open()?;
        Ok(camera)
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        Self::new(CaptureTarget::from_config(config))
    }

    /// Opens the device if it is not already open. A released camera stays released.
    pub fn open(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.released {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} (released)",
                self.target.describe()
            )));
        }
        if state
            .capture
            .is_opened()
            .map_err(CameraError::OpenCameraFailed)?
        {
            return Ok(());
        }

        let opened = match &self.target {
            CaptureTarget::Device(index) => state.capture.open(*index, videoio::CAP_ANY),
            CaptureTarget::File(path) => state
                .capture
                .open_file(&path.to_string_lossy(), videoio::CAP_ANY),
        }
        .map_err(CameraError::OpenCameraFailed)?;

        if !opened {
            return Err(CameraError::DeviceUnavailable(self.target.describe()));
        }

        tracing::info!("Opened capture device {}", self.target.describe());
        Ok(())
    }

    pub fn is_opened(&self) -> bool {
        let state = self.state.lock();
        !state.released && state.capture.is_opened().unwrap_or(false)
    }

    pub fn read_frame(&self) -> Result<Option<Frame>, CameraError> {
        let mut state = self.state.lock();
        if state.released {
            return Ok(None);
        }

        let mut mat = Mat::default();
        let grabbed = state
            .capture
            .read(&mut mat)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        Ok(Some(Frame::from_mat(mat)))
    }

    /// Releases the device. Later calls are no-ops.
    pub fn release(&self) -> Result<(), CameraError> {
        let mut state = self.state.lock();
        if state.released {
            return Ok(());
        }
        state.released = true;
        state.capture.release().map_err(CameraError::ReleaseFailed)?;
        tracing::info!("Released capture device {}", self.target.describe());
        Ok(())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Error releasing camera on drop: {:?}", e);
        }
    }
}

impl FrameSource for Arc<Camera> {
    fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
        self.read_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotator::Annotator,
        encoder::JpegEncoder,
        pipeline::{tests::ScriptedDetector, FramePipeline},
    };
    use opencv::core::{self, Scalar, Size};
    use std::path::Path;

    const CLIP_FRAMES: usize = 3;

    fn write_clip(path: &Path, frames: usize) {
        let fourcc = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G').unwrap();
        let mut writer = videoio::VideoWriter::new(
            &path.to_string_lossy(),
            fourcc,
            10.0,
            Size::new(64, 48),
            true,
        )
        .unwrap();
        assert!(writer.is_opened().unwrap());

        let mat =
            Mat::new_rows_cols_with_default(48, 64, core::CV_8UC3, Scalar::all(128.0)).unwrap();
        for _ in 0..frames {
            writer.write(&mat).unwrap();
        }
        writer.release().unwrap();
    }

    fn clip_camera(dir: &tempfile::TempDir) -> Arc<Camera> {
        let path = dir.path().join("clip.avi");
        write_clip(&path, CLIP_FRAMES);
        Arc::new(Camera::new(CaptureTarget::File(path)).unwrap())
    }

    #[test]
    fn test_target_prefers_video_file() {
        let config = CameraConfig {
            device_index: 2,
            video_file: Some(PathBuf::from("clip.mp4")),
        };
        assert_eq!(
            CaptureTarget::from_config(&config),
            CaptureTarget::File(PathBuf::from("clip.mp4"))
        );

        let config = CameraConfig {
            device_index: 2,
            video_file: None,
        };
        assert_eq!(
            CaptureTarget::from_config(&config),
            CaptureTarget::Device(2)
        );
    }

    #[test]
    fn test_missing_video_file_fails_to_open() {
        let result = Camera::new(CaptureTarget::File(PathBuf::from(
            "/nonexistent/face_stream/clip.avi",
        )));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_source_ends_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = clip_camera(&dir);
        assert!(camera.is_opened());

        for _ in 0..CLIP_FRAMES {
            let frame = camera.acquire().unwrap().expect("frame before end of file");
            assert_eq!((frame.width(), frame.height()), (64, 48));
        }
        assert!(camera.acquire().unwrap().is_none());
    }

    #[test]
    fn test_release_is_idempotent_and_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut camera = clip_camera(&dir);
        assert!(camera.acquire().unwrap().is_some());

        assert!(camera.release().is_ok());
        assert!(camera.release().is_ok());

        assert!(!camera.is_opened());
        assert!(camera.acquire().unwrap().is_none());
        assert!(matches!(
            camera.open(),
            Err(CameraError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_pipeline_over_file_source_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let camera = clip_camera(&dir);
        let mut pipeline = FramePipeline::new(
            camera,
            ScriptedDetector::none(),
            Annotator::new().unwrap(),
            JpegEncoder::new(90),
        );

        assert_eq!(pipeline.by_ref().count(), CLIP_FRAMES);
        assert!(pipeline.is_finished());
        assert!(pipeline.next().is_none());
    }
}
