use crate::{
    alert::AlertSender, annotator::Annotator, camera::Camera, config::ServerConfig,
    detector::FaceDetector, encoder::JpegEncoder, routes::api_routes, stream::StreamGate,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    net::TcpListener,
    sync::broadcast::{Receiver, Sender},
    task::JoinHandle,
};

#[derive(Clone)]
pub struct SharedState {
    pub camera: Arc<Camera>,
    pub detector: Arc<Mutex<dyn FaceDetector>>,
    pub annotator: Annotator,
    pub encoder: JpegEncoder,
    pub stream_gate: StreamGate,
    pub alert_sender: Option<Arc<dyn AlertSender>>,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: Sender<()>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = Router::new()
            .merge(api_routes())
            .with_state(state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            tracing::info!("Server stopped");
            Ok(())
        });

        Ok(server_handle)
    }
}
