//! Face detection with InsightFace's det_10g (SCRFD).
//!
//! The image is letterboxed to 640×640, each of the three stride levels is
//! decoded into boxes with five landmarks, and overlapping boxes are merged
//! by NMS. The model reads planar RGB.

use crate::raster::{ChannelOrder, Image, CHANNELS};
use crate::types::{BoundingBox, Landmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx (insightface buffalo_l) into the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Tunables for [`FaceDetector`].
#[derive(Debug, Clone, Copy)]
pub struct DetectorOptions {
    /// Minimum score for a candidate to survive decoding.
    pub confidence_threshold: f32,
    /// IoU above which the weaker of two overlapping boxes is dropped.
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            intra_threads: 2,
        }
    }
}

/// Maps letterboxed model coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, input: usize) -> (Self, usize, usize) {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, input);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, input);
        let letterbox = Self {
            scale,
            pad_x: (input - new_w) as f32 / 2.0,
            pad_y: (input - new_h) as f32 / 2.0,
        };
        (letterbox, new_w, new_h)
    }

    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Positions of the (score, bbox, kps) tensors of one stride in the output list.
type StrideOutputIndices = (usize, usize, usize);

/// Raw per-stride model outputs.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

pub struct FaceDetector {
    session: Session,
    options: DetectorOptions,
    /// Indexed like `SCRFD_STRIDES`.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model (`det_10g.onnx`) from the given path.
    pub fn load(model_path: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
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
        tracing::debug!(?stride_indices, "mapped SCRFD outputs");

        Ok(Self {
            session,
            options,
            stride_indices,
        })
    }

    /// Detect faces in an image.
    ///
    /// Ordering contract: the result is sorted by descending confidence, so
    /// index 0 is always the most confident detection.
    pub fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, DetectorError> {
        let rgb = image.with_order(ChannelOrder::Rgb);
        let (input, letterbox) = preprocess(&rgb);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in
            SCRFD_STRIDES.iter().zip(self.stride_indices.iter())
        {
            let extract = |idx: usize, what: &str| {
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
            candidates.extend(decode_stride(&level, &letterbox, self.options.confidence_threshold));
        }

        let faces = nms(candidates, self.options.nms_threshold);
        tracing::debug!(count = faces.len(), "SCRFD detections after NMS");
        Ok(faces)
    }
}

/// Letterbox an RGB image into the normalized NCHW input tensor.
///
/// Padding uses the normalization mean so it maps to 0.0.
fn preprocess(image: &Image) -> (Array4<f32>, Letterbox) {
    let (resized, letterbox, new_w, new_h) = resize_letterbox(
        image.as_bytes(),
        image.width() as usize,
        image.height() as usize,
        SCRFD_INPUT_SIZE,
    );

    let x0 = letterbox.pad_x.floor() as usize;
    let y0 = letterbox.pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..SCRFD_INPUT_SIZE {
        for x in 0..SCRFD_INPUT_SIZE {
            let inside = (y0..y0 + new_h).contains(&y) && (x0..x0 + new_w).contains(&x);
            for c in 0..CHANNELS {
                let pixel = if inside {
                    resized[((y - y0) * new_w + (x - x0)) * CHANNELS + c] as f32
                } else {
                    SCRFD_MEAN
                };
                tensor[[0, c, y, x]] = (pixel - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    (tensor, letterbox)
}

/// Bilinear resize of an interleaved 3-channel buffer to fit a square input.
///
/// Returns the resized buffer, the letterbox metadata and the resized size.
fn resize_letterbox(
    pixels: &[u8],
    width: usize,
    height: usize,
    input: usize,
) -> (Vec<u8>, Letterbox, usize, usize) {
    let (letterbox, new_w, new_h) = Letterbox::fit(width, height, input);
    let inv_scale = 1.0 / letterbox.scale;

    // Source taps (low index, high index, weight of high) along one axis.
    let taps = |out: usize, limit: usize| {
        let src = (out as f32 + 0.5) * inv_scale - 0.5;
        let lo = (src.floor() as i32).clamp(0, limit as i32 - 1) as usize;
        let hi = (lo + 1).min(limit - 1);
        (lo, hi, (src - src.floor()).clamp(0.0, 1.0))
    };

    let mut resized = vec![0u8; new_w * new_h * CHANNELS];
    for y in 0..new_h {
        let (y0, y1, fy) = taps(y, height);
        for x in 0..new_w {
            let (x0, x1, fx) = taps(x, width);
            for c in 0..CHANNELS {
                let at = |px: usize, py: usize| pixels[(py * width + px) * CHANNELS + c] as f32;
                let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
                let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
                let val = top * (1.0 - fy) + bottom * fy;
                resized[(y * new_w + x) * CHANNELS + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    (resized, letterbox, new_w, new_h)
}

/// Locate each stride's tensors in the session outputs.
///
/// Some exports call them `score_8`, `bbox_16`, `kps_32` and so on. Others
/// use numeric names, in which case the insightface layout applies: scores
/// first, then boxes, then keypoints, each ordered by stride.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named {
        Some(found) => {
            tracing::info!("SCRFD outputs matched by name");
            [found[0], found[1], found[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD outputs unnamed, assuming positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Decode candidates for a single stride level into source-image coordinates.
fn decode_stride(level: &StrideOutputs<'_>, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / level.stride;
    let stride = level.stride as f32;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    (0..num_anchors)
        .filter_map(|idx| {
            let score = level.scores.get(idx).copied().unwrap_or(0.0);
            if score <= threshold {
                return None;
            }
            let offsets = level.bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let anchor_x = (cell % grid) as f32 * stride;
            let anchor_y = (cell / grid) as f32 * stride;

            // Distances from the anchor to the four box sides, in stride units.
            let (x1, y1) = letterbox.unmap(anchor_x - offsets[0] * stride, anchor_y - offsets[1] * stride);
            let (x2, y2) = letterbox.unmap(anchor_x + offsets[2] * stride, anchor_y + offsets[3] * stride);

            let landmarks = level.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
                let mut points: Landmarks = [(0.0, 0.0); 5];
                for (point, pair) in points.iter_mut().zip(kps.chunks_exact(2)) {
                    *point = letterbox.unmap(anchor_x + pair[0] * stride, anchor_y + pair[1] * stride);
                }
                points
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Non-Maximum Suppression. Output is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
