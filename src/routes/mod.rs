mod alert;
mod health;
mod metrics;
mod shutdown;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/set_phone", post(alert::set_phone))
        .route("/shutdown", get(shutdown::shutdown))
}
