use crate::{config::EncoderConfig, frame::Frame};
use bytes::Bytes;
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Cannot encode an empty frame")]
    EmptyFrame,
    #[error("Encoder rejected frame of {width}x{height}")]
    Rejected { width: i32, height: i32 },
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(#[from] opencv::Error),
}

/// Compressed still image for one annotated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Bytes);

impl EncodedFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decodes back into a frame.
    pub fn decode(&self) -> Result<Frame, opencv::Error> {
        let mat: Mat = imgcodecs::imdecode(
            &Vector::<u8>::from_slice(&self.0),
            imgcodecs::IMREAD_COLOR,
        )?;
        Ok(Frame::from_mat(mat))
    }
}

pub trait FrameEncoder: Send {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: i32,
}

impl JpegEncoder {
    pub fn new(quality: i32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> i32 {
        self.quality
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(config.jpeg_quality)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        if frame.is_empty() {
            return Err(EncodeError::EmptyFrame);
        }

        let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, self.quality]);
        let mut buf = Vector::<u8>::new();
        let written = imgcodecs::imencode(".jpg", frame.mat(), &mut buf, &params)?;
        if !written || buf.is_empty() {
            return Err(EncodeError::Rejected {
                width: frame.width(),
                height: frame.height(),
            });
        }

        Ok(EncodedFrame::new(buf.to_vec()))
    }
}
