use crate::{
    annotator::Annotator,
    camera::FrameSource,
    detector::FaceDetector,
    encoder::{EncodedFrame, FrameEncoder},
    telemetry::Metrics,
};
use bytes::{Bytes, BytesMut};
use std::{iter::FusedIterator, sync::Arc, time::Instant};

pub const FRAME_BOUNDARY: &str = "frame";
const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// One multipart section: boundary, header, JPEG bytes, CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk(Bytes);

impl StreamChunk {
    pub fn wrap(frame: &EncodedFrame) -> Self {
        let mut buf = BytesMut::with_capacity(PART_HEADER.len() + frame.len() + PART_TRAILER.len());
        buf.extend_from_slice(PART_HEADER);
        buf.extend_from_slice(frame.as_bytes());
        buf.extend_from_slice(PART_TRAILER);
        Self(buf.freeze())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The encoded image without the multipart framing.
    pub fn payload(&self) -> &[u8] {
        &self.0[PART_HEADER.len()..self.0.len() - PART_TRAILER.len()]
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Acquire, detect, annotate, encode, wrap; one frame per `next()`.
///
/// Ends for good the first time the source is exhausted or fails. Frames that fail
/// to detect, annotate or encode are dropped and the next frame is tried.
pub struct FramePipeline<S, D, E> {
    source: S,
    detector: D,
    annotator: Annotator,
    encoder: E,
    metrics: Option<Arc<Metrics>>,
    finished: bool,
}

impl<S, D, E> FramePipeline<S, D, E>
where
    S: FrameSource,
    D: FaceDetector,
    E: FrameEncoder,
{
    pub fn new(source: S, detector: D, annotator: Annotator, encoder: E) -> Self {
        Self {
            source,
            detector,
            annotator,
            encoder,
            metrics: None,
            finished: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn record_dropped(&self, stage: &'static str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dropped_frame(stage);
        }
    }

    fn process_next(&mut self) -> Option<StreamChunk> {
        loop {
            let mut frame = match self.source.acquire() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Frame source exhausted, ending stream");
                    return None;
                }
                Err(e) => {
                    tracing::error!("Error acquiring frame, ending stream: {:?}", e);
                    return None;
                }
            };
            let started = Instant::now();

            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    tracing::warn!("Dropping frame, detection failed: {:?}", e);
                    self.record_dropped("detect");
                    continue;
                }
            };

            if let Err(e) = self.annotator.annotate(&mut frame, &detections) {
                tracing::warn!("Dropping frame, annotation failed: {:?}", e);
                self.record_dropped("annotate");
                continue;
            }

            let encoded = match self.encoder.encode(&frame) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::warn!("Dropping frame, encoding failed: {:?}", e);
                    self.record_dropped("encode");
                    continue;
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_frame(detections.len() as u64, started.elapsed());
            }
            return Some(StreamChunk::wrap(&encoded));
        }
    }
}

impl<S, D, E> Iterator for FramePipeline<S, D, E>
where
    S: FrameSource,
    D: FaceDetector,
    E: FrameEncoder,
{
    type Item = StreamChunk;

    fn next(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = self.process_next();
        if chunk.is_none() {
            self.finished = true;
        }
        chunk
    }
}

impl<S, D, E> FusedIterator for FramePipeline<S, D, E>
where
    S: FrameSource,
    D: FaceDetector,
    E: FrameEncoder,
{
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        bounding_box::{Detection, NormalizedBox},
        camera::CameraError,
        detector::DetectorError,
        encoder::{EncodeError, JpegEncoder},
        frame::Frame,
    };
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Frames handed out in order, then end of stream.
    pub struct ScriptedSource {
        pub frames: VecDeque<Frame>,
        pub acquired: Arc<Mutex<usize>>,
    }

    impl ScriptedSource {
        pub fn blank(count: usize, width: i32, height: i32) -> Self {
            Self {
                frames: (0..count)
                    .map(|_| Frame::blank(width, height).unwrap())
                    .collect(),
                acquired: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
            *self.acquired.lock() += 1;
            Ok(self.frames.pop_front())
        }
    }

    /// One canned answer per frame; no faces once the script runs out.
    pub struct ScriptedDetector {
        pub script: VecDeque<Result<Vec<Detection>, String>>,
    }

    impl ScriptedDetector {
        pub fn new(script: Vec<Vec<Detection>>) -> Self {
            Self {
                script: script.into_iter().map(Ok).collect(),
            }
        }

        pub fn none() -> Self {
            Self::new(Vec::new())
        }
    }

    impl FaceDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            match self.script.pop_front() {
                Some(Ok(detections)) => Ok(detections),
                Some(Err(msg)) => Err(DetectorError::UnexpectedOutput(msg)),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Fails on the listed call numbers (0-based), otherwise JPEG-encodes and keeps
    /// a copy of every frame it was given.
    struct RecordingEncoder {
        inner: JpegEncoder,
        fail_on: Vec<usize>,
        calls: Mutex<usize>,
        seen: Arc<Mutex<Vec<Frame>>>,
    }

    impl RecordingEncoder {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                inner: JpegEncoder::new(90),
                fail_on,
                calls: Mutex::new(0),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl FrameEncoder for RecordingEncoder {
        fn encode(&self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
            let mut calls = self.calls.lock();
            let call = *calls;
            *calls += 1;
            if self.fail_on.contains(&call) {
                return Err(EncodeError::Rejected {
                    width: frame.width(),
                    height: frame.height(),
                });
            }
            self.seen.lock().push(frame.try_clone().unwrap());
            self.inner.encode(frame)
        }
    }

    fn face(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection {
            normalized_box: NormalizedBox::new(x, y, w, h),
            confidence: 0.9,
        }
    }

    fn pipeline<D: FaceDetector, E: FrameEncoder>(
        source: ScriptedSource,
        detector: D,
        encoder: E,
    ) -> FramePipeline<ScriptedSource, D, E> {
        FramePipeline::new(source, detector, Annotator::new().unwrap(), encoder)
    }

    /// Bounding rectangle (min_x, min_y, max_x, max_y) of all non-black pixels.
    fn drawn_extent(frame: &Frame) -> Option<(i32, i32, i32, i32)> {
        let mut extent: Option<(i32, i32, i32, i32)> = None;
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                if frame.pixel(x, y).unwrap() != [0, 0, 0] {
                    extent = Some(match extent {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }
        extent
    }

    #[test]
    fn test_chunk_framing() {
        let chunk = StreamChunk::wrap(&EncodedFrame::new(vec![1u8, 2, 3]));
        assert_eq!(
            chunk.as_bytes(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\x01\x02\x03\r\n"
        );
        assert_eq!(chunk.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_one_chunk_per_frame_then_done() {
        let mut pipeline = pipeline(
            ScriptedSource::blank(3, 64, 48),
            ScriptedDetector::none(),
            JpegEncoder::new(90),
        );

        assert_eq!(pipeline.by_ref().count(), 3);
        assert!(pipeline.is_finished());
    }

    #[test]
    fn test_end_of_stream_is_final() {
        let source = ScriptedSource::blank(1, 32, 32);
        let acquired = source.acquired.clone();
        let mut pipeline = pipeline(source, ScriptedDetector::none(), JpegEncoder::new(90));

        assert!(pipeline.next().is_some());
        assert!(pipeline.next().is_none());
        assert_eq!(*acquired.lock(), 2);

        // no further pulls reach the source
        assert!(pipeline.next().is_none());
        assert!(pipeline.next().is_none());
        assert_eq!(*acquired.lock(), 2);
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let mut pipeline = pipeline(
            ScriptedSource::blank(0, 32, 32),
            ScriptedDetector::none(),
            JpegEncoder::new(90),
        );
        assert!(pipeline.next().is_none());
    }

    #[test]
    fn test_source_error_ends_stream() {
        struct Broken;
        impl FrameSource for Broken {
            fn acquire(&mut self) -> Result<Option<Frame>, CameraError> {
                Err(CameraError::DeviceUnavailable("#0".into()))
            }
        }

        let mut pipeline = FramePipeline::new(
            Broken,
            ScriptedDetector::none(),
            Annotator::new().unwrap(),
            JpegEncoder::new(90),
        );
        assert!(pipeline.next().is_none());
        assert!(pipeline.is_finished());
    }

    #[test]
    fn test_encode_failure_skips_only_that_frame() {
        let encoder = RecordingEncoder::new(vec![1]);
        let mut pipeline = pipeline(
            ScriptedSource::blank(3, 32, 32),
            ScriptedDetector::none(),
            encoder,
        );

        let chunks: Vec<_> = pipeline.by_ref().collect();

        assert_eq!(chunks.len(), 2);
        for chunk in chunks {
            let decoded = EncodedFrame::new(chunk.payload().to_vec()).decode().unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 32));
        }
    }

    #[test]
    fn test_detection_failure_skips_only_that_frame() {
        let detector = ScriptedDetector {
            script: VecDeque::from(vec![Err("corrupt".to_string()), Ok(Vec::new())]),
        };
        let pipeline = pipeline(
            ScriptedSource::blank(2, 32, 32),
            detector,
            JpegEncoder::new(90),
        );

        assert_eq!(pipeline.count(), 1);
    }

    #[test]
    fn test_two_frame_scenario() {
        let encoder = RecordingEncoder::new(Vec::new());
        let seen = encoder.seen.clone();
        let detector = ScriptedDetector::new(vec![vec![face(0.0, 0.0, 0.5, 0.5)], vec![]]);
        let pipeline = pipeline(ScriptedSource::blank(2, 640, 480), detector, encoder);

        let chunks: Vec<_> = pipeline.collect();

        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.as_bytes().starts_with(b"--frame\r\n"));
            assert!(chunk.as_bytes().ends_with(b"\r\n"));
        }

        let seen = seen.lock();
        let (x0, y0, x1, y1) = drawn_extent(&seen[0]).expect("overlay on first frame");
        assert_eq!((x0, y0), (0, 0));
        // box corner at (320, 240) plus stroke
        assert!(x1 <= 321 && y1 <= 241);
        assert_eq!(seen[0].pixel(0, 120).unwrap(), [0, 255, 0]);

        // label held at the top edge, inside the same quadrant
        let floor = Annotator::new().unwrap().label_floor();
        let mut red = 0;
        for y in 0..=floor {
            for x in 0..110 {
                if seen[0].pixel(x, y).unwrap() == [0, 0, 255] {
                    red += 1;
                }
            }
        }
        assert!(red > 0);

        assert!(drawn_extent(&seen[1]).is_none());
    }
}
