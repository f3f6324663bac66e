//! Identity embeddings from the w600k_r50 ArcFace model.
//!
//! The swap model is conditioned on these vectors, so only the source face
//! ever passes through here.

use crate::alignment;
use crate::raster::{ChannelOrder, Image};
use crate::types::{Embedding, Landmarks};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = alignment::ARCFACE_ALIGNED_SIZE as usize;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
pub const ARCFACE_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download w600k_r50.onnx (insightface buffalo_l) into the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Unit-length embedding of the face whose five landmarks are given.
    pub fn extract(&mut self, image: &Image, landmarks: &Landmarks) -> Result<Embedding, RecognizerError> {
        let aligned = alignment::align_face(image, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("reading embedding: {e}")))?;
        if values.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "embedding has {} values, want {ARCFACE_EMBEDDING_DIM}",
                values.len()
            )));
        }

        Ok(Embedding { values: l2_normalize(values) })
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub(crate) fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let length = raw.iter().fold(0.0f32, |acc, v| acc + v * v).sqrt();
    if length == 0.0 {
        return raw.to_vec();
    }
    raw.iter().map(|v| v / length).collect()
}

/// NCHW tensor of an aligned crop, RGB planes scaled to [-1, 1].
fn preprocess(aligned_face: &Image) -> Array4<f32> {
    let rgb = aligned_face.with_order(ChannelOrder::Rgb);
    let bytes = rgb.as_bytes();
    let size = ARCFACE_INPUT_SIZE;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        (bytes[(y * size + x) * 3 + c] as f32 - ARCFACE_MEAN) / ARCFACE_STD
    })
}
