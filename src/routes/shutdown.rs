use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::instrument;

/// Releases the camera, which ends any active stream, then stops the server.
#[instrument(skip(state))]
pub async fn shutdown(State(state): State<SharedState>) -> Response {
    let camera = state.camera.clone();
    // waits for an in-flight frame read to finish
    let released = tokio::task::spawn_blocking(move || camera.release()).await;

    match released {
        Ok(Ok(())) => {
            let _ = state.shutdown_tx.send(());
            "Camera released. Server shutting down.".into_response()
        }
        Ok(Err(e)) => {
            tracing::error!("Failed to release camera: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("Camera release task failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
