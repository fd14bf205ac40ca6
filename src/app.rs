use crate::{
    alert::{AlertSender, TwilioAlertSender, TEST_MESSAGE},
    annotator::Annotator,
    camera::Camera,
    config::{AlertConfig, Config},
    detector::{BlazeFaceDetector, FaceDetector},
    encoder::JpegEncoder,
    server::{HttpServer, SharedState},
    stream::StreamGate,
    telemetry::Metrics,
};
use parking_lot::Mutex;
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let camera: Arc<Camera> = match Camera::from_config(&config.camera) {
        Ok(cam) => Arc::new(cam),
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!(opened = camera.is_opened(), "Camera initialized");

    let detector: Arc<Mutex<dyn FaceDetector>> = match BlazeFaceDetector::new(&config.detector) {
        Ok(detector) => Arc::new(Mutex::new(detector)),
        Err(e) => {
            tracing::error!("Failed to initialize face detector: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let metrics = Arc::new(Metrics::new()?);

    let alert_sender = config
        .alert
        .as_ref()
        .map(|alert| Arc::new(TwilioAlertSender::new(alert)) as Arc<dyn AlertSender>);
    if let (Some(sender), Some(alert)) = (&alert_sender, &config.alert) {
        send_startup_test(sender.clone(), alert);
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut control_rx = shutdown_tx.subscribe();

    let state = SharedState {
        camera: camera.clone(),
        detector,
        annotator: Annotator::new()?,
        encoder: JpegEncoder::from_config(&config.encoder),
        stream_gate: StreamGate::new(),
        alert_sender,
        metrics,
        shutdown_tx: shutdown_tx.clone(),
    };

    let server = HttpServer::new(state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
        }
        _ = control_rx.recv() => {
            tracing::info!("Shutdown requested over HTTP, starting graceful shutdown.");
        }
    }

    let _ = shutdown_tx.send(());
    // an open stream ends on its next frame once the device is gone
    let release = tokio::task::spawn_blocking(move || camera.release()).await;
    if let Ok(Err(e)) = release {
        tracing::error!("Failed to release camera: {:?}", e);
    }

    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Server error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

fn send_startup_test(sender: Arc<dyn AlertSender>, alert: &AlertConfig) {
    if !alert.send_test_on_startup {
        return;
    }
    let Some(destination) = alert.test_destination.clone() else {
        tracing::warn!("send_test_on_startup is set but no test_destination is configured");
        return;
    };

    tokio::spawn(async move {
        let outcome = sender.send(&destination, TEST_MESSAGE).await;
        tracing::info!(
            "Startup test alert: {} ({})",
            outcome.status.as_str(),
            outcome.detail
        );
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
