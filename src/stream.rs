use crate::{
    camera::FrameSource, detector::FaceDetector, encoder::FrameEncoder, pipeline::FramePipeline,
};
use bytes::Bytes;
use futures::stream;
use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Another client is already streaming from the camera")]
    StreamBusy,
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

/// Grants the camera to one stream consumer at a time.
#[derive(Debug, Clone, Default)]
pub struct StreamGate {
    active: Arc<AtomicBool>,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<StreamLease, VideoStreamError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| VideoStreamError::StreamBusy)?;
        Ok(StreamLease {
            active: self.active.clone(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Held for the lifetime of one stream; frees the gate on drop.
#[derive(Debug)]
pub struct StreamLease {
    active: Arc<AtomicBool>,
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

struct StreamState<S, D, E> {
    pipeline: FramePipeline<S, D, E>,
    _lease: StreamLease,
}

pub struct VideoStream<S, D, E> {
    pipeline: FramePipeline<S, D, E>,
    lease: StreamLease,
}

impl<S, D, E> VideoStream<S, D, E>
where
    S: FrameSource + 'static,
    D: FaceDetector + 'static,
    E: FrameEncoder + 'static,
{
    pub fn new(pipeline: FramePipeline<S, D, E>, lease: StreamLease) -> Self {
        Self { pipeline, lease }
    }

    /// Multipart body parts, produced one at a time as the consumer polls.
    ///
    /// Each part runs on the blocking pool; nothing is captured ahead of demand.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
        let state = StreamState {
            pipeline: self.pipeline,
            _lease: self.lease,
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            let next = tokio::task::spawn_blocking(move || {
                let chunk = state.pipeline.next();
                (chunk, state)
            })
            .await;

            match next {
                Ok((Some(chunk), state)) => Some((Ok(chunk.into_bytes()), Some(state))),
                Ok((None, _)) => {
                    tracing::info!("Video stream finished");
                    None
                }
                Err(e) => {
                    tracing::error!("Frame worker failed: {:?}", e);
                    None
                }
            }
        })
    }
}
