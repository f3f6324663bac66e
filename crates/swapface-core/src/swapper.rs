//! inswapper face-swap model via ONNX Runtime.
//!
//! The model takes an aligned 128×128 RGB crop of the target face (scaled to
//! [0, 1]) and a 512-dim latent derived from the source identity embedding,
//! and returns the swapped 128×128 RGB crop in [0, 1].

use crate::raster::{ChannelOrder, Image, CHANNELS};
use crate::recognizer::{l2_normalize, ARCFACE_EMBEDDING_DIM};
use crate::types::Embedding;
use ndarray::{Array2, Array4, ArrayView1};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const INSWAPPER_INPUT_SIZE: u32 = 128;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0}; download inswapper_128.onnx into the model dir")]
    ModelNotFound(String),
    #[error("invalid emap file {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("embedding has {0} dimensions, expected 512")]
    EmbeddingDimension(usize),
    #[error("swap crop must be {expected}x{expected}, got {width}x{height}")]
    CropSize { expected: u32, width: u32, height: u32 },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A model that renders a source identity into an aligned target crop.
///
/// Implementations are driven behind a mutex, one call at a time.
pub trait SwapModel: Send {
    /// Side length of the square crop consumed and produced.
    fn crop_size(&self) -> u32;

    /// Swap `source` into `crop`, returning a crop of the same size.
    fn swap_crop(&mut self, crop: &Image, source: &Embedding) -> Result<Image, SwapperError>;
}

/// inswapper_128 session plus its embedding projection matrix.
pub struct InSwapper {
    session: Session,
    /// Row-major 512×512 projection; `None` for exports with it folded in.
    emap: Option<Array2<f32>>,
}

impl InSwapper {
    /// Load the swap model and, if present, its emap matrix (raw little-endian f32).
    pub fn load(model_path: &Path, emap_path: &Path, intra_threads: usize) -> Result<Self, SwapperError> {
        if !model_path.exists() {
            return Err(SwapperError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        let emap = if emap_path.exists() {
            let bytes = std::fs::read(emap_path)?;
            Some(parse_emap(&bytes).map_err(|reason| SwapperError::InvalidEmap {
                path: emap_path.display().to_string(),
                reason,
            })?)
        } else {
            tracing::warn!(
                path = %emap_path.display(),
                "emap not found; feeding the normalized embedding to the swap model directly"
            );
            None
        };

        Ok(Self { session, emap })
    }
}

impl SwapModel for InSwapper {
    fn crop_size(&self) -> u32 {
        INSWAPPER_INPUT_SIZE
    }

    fn swap_crop(&mut self, crop: &Image, source: &Embedding) -> Result<Image, SwapperError> {
        if crop.dimensions() != (INSWAPPER_INPUT_SIZE, INSWAPPER_INPUT_SIZE) {
            return Err(SwapperError::CropSize {
                expected: INSWAPPER_INPUT_SIZE,
                width: crop.width(),
                height: crop.height(),
            });
        }

        let target = preprocess(crop);
        let latent = Array2::from_shape_vec(
            (1, ARCFACE_EMBEDDING_DIM),
            project_latent(&source.values, self.emap.as_ref())?,
        )
        .map_err(|e| SwapperError::InferenceFailed(format!("latent shape: {e}")))?;

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(target.view())?,
            "source" => TensorRef::from_array_view(latent.view())?
        ])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;
        tracing::trace!(?shape, "inswapper output");

        planar_to_image(data, INSWAPPER_INPUT_SIZE)
    }
}

/// Parse a 512×512 little-endian f32 matrix.
fn parse_emap(bytes: &[u8]) -> Result<Array2<f32>, String> {
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(format!("expected {expected} bytes, got {}", bytes.len()));
    }
    let values = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), values).map_err(|e| e.to_string())
}

/// `normalize(embedding · emap)`, or just `normalize(embedding)` without an emap.
fn project_latent(embedding: &[f32], emap: Option<&Array2<f32>>) -> Result<Vec<f32>, SwapperError> {
    if embedding.len() != ARCFACE_EMBEDDING_DIM {
        return Err(SwapperError::EmbeddingDimension(embedding.len()));
    }
    let projected = match emap {
        Some(m) => ArrayView1::from(embedding).dot(m).to_vec(),
        None => embedding.to_vec(),
    };
    Ok(l2_normalize(&projected))
}

/// RGB planes scaled to [0, 1] (mean 0, std 255).
fn preprocess(crop: &Image) -> Array4<f32> {
    let rgb = crop.with_order(ChannelOrder::Rgb);
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (i, px) in rgb.as_bytes().chunks_exact(CHANNELS).enumerate() {
        for c in 0..CHANNELS {
            tensor[[0, c, i / w, i % w]] = px[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Convert a `[1, 3, size, size]` RGB tensor in [0, 1] into an RGB image.
fn planar_to_image(data: &[f32], size: u32) -> Result<Image, SwapperError> {
    let plane = size as usize * size as usize;
    if data.len() != plane * CHANNELS {
        return Err(SwapperError::InferenceFailed(format!(
            "expected {} output values, got {}",
            plane * CHANNELS,
            data.len()
        )));
    }
    let mut pixels = Vec::with_capacity(plane * CHANNELS);
    for i in 0..plane {
        for c in 0..CHANNELS {
            pixels.push((data[c * plane + i].clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    Image::new(size, size, ChannelOrder::Rgb, pixels)
        .map_err(|e| SwapperError::InferenceFailed(e.to_string()))
}
