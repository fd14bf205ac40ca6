use super::{DetectorError, FaceDetector};
use crate::{
    bounding_box::{Detection, NormalizedBox},
    config::{DetectorConfig, ModelVariant},
    frame::Frame,
};
use ndarray::{Array, Ix4};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::path::Path;

/// Raw scores are clipped to this magnitude before the sigmoid.
const SCORE_CLIP: f32 = 100.0;

struct AnchorLayout {
    input_size: u32,
    /// (stride, anchors per cell)
    layers: &'static [(u32, usize)],
}

fn anchor_layout(variant: ModelVariant) -> AnchorLayout {
    match variant {
        ModelVariant::ShortRange => AnchorLayout {
            input_size: 128,
            layers: &[(8, 2), (16, 6)],
        },
        ModelVariant::FullRange => AnchorLayout {
            input_size: 192,
            layers: &[(4, 1)],
        },
    }
}

fn generate_anchors(layout: &AnchorLayout) -> Vec<[f32; 2]> {
    let mut anchors = Vec::new();
    for &(stride, per_cell) in layout.layers {
        let grid = (layout.input_size / stride) as usize;
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }
    anchors
}

/// Placement of a frame inside the square model input, aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    size: i32,
    scaled_width: i32,
    scaled_height: i32,
    pad_left: i32,
    pad_top: i32,
}

impl Letterbox {
    fn fit(frame_width: i32, frame_height: i32, size: u32) -> Self {
        let size = size as i32;
        let scale = (size as f64 / frame_width as f64).min(size as f64 / frame_height as f64);
        let scaled_width = ((frame_width as f64 * scale).round() as i32).clamp(1, size);
        let scaled_height = ((frame_height as f64 * scale).round() as i32).clamp(1, size);
        Self {
            size,
            scaled_width,
            scaled_height,
            pad_left: (size - scaled_width) / 2,
            pad_top: (size - scaled_height) / 2,
        }
    }

    /// Maps a centre-size box normalized to the model input back to the frame.
    fn remove(&self, cx: f32, cy: f32, w: f32, h: f32) -> NormalizedBox {
        let size = self.size as f32;
        let sw = self.scaled_width as f32;
        let sh = self.scaled_height as f32;
        let x_min = ((cx - w / 2.0) * size - self.pad_left as f32) / sw;
        let y_min = ((cy - h / 2.0) * size - self.pad_top as f32) / sh;
        NormalizedBox::new(x_min, y_min, w * size / sw, h * size / sh)
    }
}

/// Letterboxed, RGB, [-1, 1], NCHW.
fn preprocess(frame: &Frame, letterbox: &Letterbox) -> Result<Array<f32, Ix4>, DetectorError> {
    if frame.is_empty() {
        return Err(DetectorError::UnsupportedFrame("empty frame".into()));
    }
    if frame.mat().channels() != 3 {
        return Err(DetectorError::UnsupportedFrame(format!(
            "expected 3 channels, got {}",
            frame.mat().channels()
        )));
    }

    let mut resized = Mat::default();
    imgproc::resize(
        frame.mat(),
        &mut resized,
        Size::new(letterbox.scaled_width, letterbox.scaled_height),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    let data = resized.data_bytes()?;

    let size = letterbox.size as usize;
    let (sw, sh) = (
        letterbox.scaled_width as usize,
        letterbox.scaled_height as usize,
    );
    let (left, top) = (letterbox.pad_left as usize, letterbox.pad_top as usize);

    let mut input = Array::from_elem((1, 3, size, size), -1.0f32);
    for y in 0..sh {
        for x in 0..sw {
            let i = (y * sw + x) * 3;
            let [b, g, r] = [data[i], data[i + 1], data[i + 2]];
            input[[0, 0, top + y, left + x]] = r as f32 / 127.5 - 1.0;
            input[[0, 1, top + y, left + x]] = g as f32 / 127.5 - 1.0;
            input[[0, 2, top + y, left + x]] = b as f32 / 127.5 - 1.0;
        }
    }

    Ok(input)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    bbox: NormalizedBox,
    score: f32,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-SCORE_CLIP, SCORE_CLIP)).exp())
}

fn decode_candidates(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    letterbox: &Letterbox,
    min_confidence: f32,
) -> Vec<Candidate> {
    let stride = if anchors.is_empty() {
        0
    } else {
        regressors.len() / anchors.len()
    };
    if stride < 4 {
        return Vec::new();
    }

    let size = letterbox.size as f32;
    anchors
        .iter()
        .zip(scores)
        .enumerate()
        .filter_map(|(i, (anchor, &raw))| {
            let score = sigmoid(raw);
            if score < min_confidence {
                return None;
            }
            let reg = &regressors[i * stride..i * stride + 4];
            let cx = anchor[0] + reg[0] / size;
            let cy = anchor[1] + reg[1] / size;
            let w = reg[2] / size;
            let h = reg[3] / size;
            Some(Candidate {
                bbox: letterbox.remove(cx, cy, w, h),
                score,
            })
        })
        .collect()
}

fn intersection(a: &NormalizedBox, b: &NormalizedBox) -> f32 {
    let w = (a.x_min + a.width).min(b.x_min + b.width) - a.x_min.max(b.x_min);
    let h = (a.y_min + a.height).min(b.y_min + b.height) - a.y_min.max(b.y_min);
    w.max(0.0) * h.max(0.0)
}

fn iou(a: &NormalizedBox, b: &NormalizedBox) -> f32 {
    let inter = intersection(a, b);
    let union = a.width * a.height + b.width * b.height - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy suppression, highest score first. Output is in descending score order.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn build_session(path: &Path) -> Result<Session, ort::Error> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)
}

/// BlazeFace running in-process on ONNX Runtime. Load once, reuse for every frame.
pub struct BlazeFaceDetector {
    session: Session,
    input_size: u32,
    anchors: Vec<[f32; 2]>,
    min_confidence: f32,
    nms_iou_threshold: f32,
}

impl BlazeFaceDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let path = config.get_model_path();
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path));
        }

        let layout = anchor_layout(config.model_variant);
        let session = build_session(&path)?;
        let anchors = generate_anchors(&layout);

        tracing::info!(
            "Loaded {:?} face model from {:?} ({} anchors)",
            config.model_variant,
            path,
            anchors.len()
        );

        Ok(Self {
            session,
            input_size: layout.input_size,
            anchors,
            min_confidence: config.min_confidence,
            nms_iou_threshold: config.nms_iou_threshold,
        })
    }
}

impl FaceDetector for BlazeFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let letterbox = Letterbox::fit(frame.width(), frame.height(), self.input_size);
        let input = preprocess(frame, &letterbox)?;

        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let outputs = self.session.run(ort::inputs![tensor_ref])?;
        if outputs.len() < 2 {
            return Err(DetectorError::UnexpectedOutput(format!(
                "expected regressors and scores, got {} outputs",
                outputs.len()
            )));
        }

        let (_, first) = outputs[0].try_extract_tensor::<f32>()?;
        let (_, second) = outputs[1].try_extract_tensor::<f32>()?;
        // one score per anchor, several regressor values per anchor
        let (regressors, scores) = if first.len() >= second.len() {
            (first, second)
        } else {
            (second, first)
        };
        if scores.len() != self.anchors.len() {
            return Err(DetectorError::UnexpectedOutput(format!(
                "{} scores for {} anchors",
                scores.len(),
                self.anchors.len()
            )));
        }

        let candidates = decode_candidates(
            regressors,
            scores,
            &self.anchors,
            &letterbox,
            self.min_confidence,
        );
        let kept = non_max_suppression(candidates, self.nms_iou_threshold);

        tracing::debug!("Detected {} faces", kept.len());

        Ok(kept
            .into_iter()
            .map(|c| Detection {
                normalized_box: c.bbox.clamped(),
                confidence: c.score,
            })
            .collect())
    }
}
