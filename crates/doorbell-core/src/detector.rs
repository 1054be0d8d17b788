//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the 3-stride anchor-free SCRFD model on an RGB frame, decodes boxes
//! and landmarks, and suppresses overlaps with NMS.

use crate::frame::{Frame, CHANNELS};
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face detection backend.
///
/// Returns every face above the backend's own floor, in any order.
pub trait FaceDetect: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Scale and padding applied when fitting the frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    /// Map a point from model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw tensors produced for a single stride level.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
    /// Detections at or below this score are discarded while decoding.
    score_threshold: f32,
}

impl ScrfdDetector {
    /// Load an SCRFD ONNX model, keeping detections above `score_threshold`.
    pub fn load(model_path: &Path, score_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
            score_threshold,
        })
    }

    /// Build the NCHW input tensor: bilinear resize into a letterboxed square,
    /// padding with the mean so padding normalizes to zero.
    fn preprocess(frame: &Frame) -> (Array4<f32>, Letterbox) {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let letterbox = Letterbox::fit(width, height, SCRFD_INPUT_SIZE);

        let new_w = (width as f32 * letterbox.scale).round() as usize;
        let new_h = (height as f32 * letterbox.scale).round() as usize;
        let x_start = letterbox.pad_x.floor() as usize;
        let y_start = letterbox.pad_y.floor() as usize;

        let mut tensor =
            Array4::<f32>::zeros((1, CHANNELS, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        // Zero in normalized space is the padding value.
        let inv_scale = 1.0 / letterbox.scale;

        for y in 0..new_h.min(SCRFD_INPUT_SIZE - y_start) {
            let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..new_w.min(SCRFD_INPUT_SIZE - x_start) {
                let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                for c in 0..CHANNELS {
                    let px = |xx: usize, yy: usize| frame.data[(yy * width + xx) * CHANNELS + c] as f32;
                    let val = px(x0, y0) * (1.0 - fx) * (1.0 - fy)
                        + px(x1, y0) * fx * (1.0 - fy)
                        + px(x0, y1) * (1.0 - fx) * fy
                        + px(x1, y1) * fx * fy;
                    tensor[[0, c, y + y_start, x + x_start]] = (val - SCRFD_MEAN) / SCRFD_STD;
                }
            }
        }

        (tensor, letterbox)
    }
}

impl FaceDetect for ScrfdDetector {
    /// Detect faces in an RGB frame, sorted by descending confidence.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[pos];
            let extract = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let level = StrideOutputs {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            detections.extend(decode_stride(&level, &letterbox, self.score_threshold));
        }

        Ok(nms(detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Map SCRFD outputs to stride slots.
///
/// Named exports ("score_8", "bbox_16", "kps_32", ...) are matched by name;
/// anything else uses the standard positional layout
/// [scores 8/16/32, bboxes 8/16/32, kps 8/16/32].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(v) if v.len() == 3 => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [v[0], v[1], v[2]]
        }
        _ => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode the anchors of one stride level into frame-space boxes.
fn decode_stride(level: &StrideOutputs<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let stride = level.stride as f32;
    let grid_w = SCRFD_INPUT_SIZE / level.stride;
    let grid_h = SCRFD_INPUT_SIZE / level.stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;

    let mut out = Vec::new();
    for idx in 0..num_anchors {
        let score = level.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * stride;
        let anchor_y = (cell / grid_w) as f32 * stride;

        let Some(offsets) = level.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * stride, anchor_y - offsets[1] * stride);
        let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * stride, anchor_y + offsets[3] * stride);

        let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.unmap(anchor_x + k[i * 2] * stride, anchor_y + k[i * 2 + 1] * stride)
            })
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    out
}

fn by_confidence_desc(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal)
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    // Stable sort keeps first-seen order among equal scores.
    detections.sort_by(by_confidence_desc);

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let result = nms(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_tie_keeps_first_seen() {
        let result = nms(
            vec![bbox(0.0, 0.0, 10.0, 10.0, 0.8), bbox(50.0, 50.0, 10.0, 10.0, 0.8)],
            0.4,
        );
        assert_eq!(result[0].x, 0.0);
        assert_eq!(result[1].x, 50.0);
    }

    #[test]
    fn test_letterbox_unmap_inverts_fit() {
        let lb = Letterbox::fit(640, 480, SCRFD_INPUT_SIZE);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1);
        assert!((y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let frame = Frame::filled(64, 32, [200, 100, 0]);
        let (tensor, lb) = ScrfdDetector::preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // Top rows are letterbox padding → normalized zero
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Centre lies inside the resized image and keeps channel order
        let c = SCRFD_INPUT_SIZE / 2;
        assert!(lb.pad_y > 0.0);
        assert!((tensor[[0, 0, c, c]] - (200.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
        assert!((tensor[[0, 2, c, c]] - (0.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let grid = SCRFD_INPUT_SIZE / 32;
        let n = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; n];
        let mut bboxes = vec![0.0f32; n * 4];
        let kps = vec![0.0f32; n * 10];
        // Anchor index 2 → cell 1 → (x=32, y=0)
        scores[2] = 0.95;
        bboxes[8..12].copy_from_slice(&[0.5, 0.0, 1.0, 2.0]);
        let level = StrideOutputs { stride: 32, scores: &scores, bboxes: &bboxes, kps: &kps };

        let dets = decode_stride(&level, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x - 16.0).abs() < 1e-5);
        assert!((d.y - 0.0).abs() < 1e-5);
        assert!((d.width - 48.0).abs() < 1e-5);
        assert!((d.height - 64.0).abs() < 1e-5);
        assert!(d.landmarks.is_some());
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();

        let indices = discover_output_indices(&names);
        assert_eq!(indices, [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (400 + i).to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
