use crate::{
    pipeline::{FramePipeline, FRAME_BOUNDARY},
    server::SharedState,
    stream::{VideoStream, VideoStreamError},
};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::instrument;

#[instrument(skip(state))]
pub async fn video_feed(State(state): State<SharedState>) -> Result<Response, VideoStreamError> {
    let lease = state.stream_gate.try_acquire()?;

    let pipeline = FramePipeline::new(
        state.camera.clone(),
        state.detector.clone(),
        state.annotator.clone(),
        state.encoder,
    )
    .with_metrics(state.metrics.clone());

    let stream = VideoStream::new(pipeline, lease).generate_stream();

    let body = Body::from_stream(stream);

    let response = Response::builder()
        .header(header::CONTENT_TYPE, stream_content_type())
        .body(body)
        .map_err(|e| VideoStreamError::HttpBuilderError(e.to_string()))?;

    Ok(response)
}

fn stream_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", FRAME_BOUNDARY)
}

impl IntoResponse for VideoStreamError {
    fn into_response(self) -> Response {
        let status = match self {
            VideoStreamError::StreamBusy => StatusCode::CONFLICT,
            VideoStreamError::HttpBuilderError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
