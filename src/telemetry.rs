use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::{collections::HashSet, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to build Prometheus exporter: {0}")]
    ExporterBuildFailed(String),
}

pub struct Metrics {
    frames_streamed: Counter<u64>,
    frames_dropped: Counter<u64>,
    faces_detected: Counter<u64>,
    frame_processing_duration: Histogram<u64>,
    alerts_sent: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| TelemetryError::ExporterBuildFailed(e.to_string()))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("face_stream");
        global::set_meter_provider(provider);

        let frames_streamed = meter
            .u64_counter("frames_streamed_total")
            .with_description("Annotated frames delivered to stream consumers")
            .build();

        let frames_dropped = meter
            .u64_counter("frames_dropped_total")
            .with_description("Frames skipped because a pipeline stage failed")
            .build();

        let faces_detected = meter
            .u64_counter("faces_detected_total")
            .with_description("Faces found across all streamed frames")
            .build();

        let boundaries = generate_boundaries((5, 25, 45, 205, 1005));

        let frame_processing_duration = meter
            .u64_histogram("frame_processing_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Detect, annotate and encode time per frame in milliseconds")
            .build();

        let alerts_sent = meter
            .u64_counter("alerts_sent_total")
            .with_description("Alert messages attempted, by outcome")
            .build();

        Ok(Metrics {
            frames_streamed,
            frames_dropped,
            faces_detected,
            frame_processing_duration,
            alerts_sent,
            registry,
        })
    }

    pub fn record_frame(&self, faces: u64, elapsed: Duration) {
        self.frames_streamed.add(1, &[]);
        self.faces_detected.add(faces, &[]);
        self.frame_processing_duration
            .record(elapsed.as_millis() as u64, &[]);
    }

    pub fn record_dropped_frame(&self, stage: &'static str) {
        let attributes = [KeyValue::new("stage", stage)];
        self.frames_dropped.add(1, &attributes);
    }

    pub fn record_alert(&self, status: &'static str) {
        let attributes = [KeyValue::new("status", status)];
        self.alerts_sent.add(1, &attributes);
    }
}

/// Histogram bucket edges: fine steps for fast frames, coarse for slow ones.
fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 10;
    let end_step: usize = 40;
    let tail_step: usize = 200;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
