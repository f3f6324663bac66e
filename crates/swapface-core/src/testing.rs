//! Model stand-ins for unit tests.

use crate::alignment::{reference_landmarks, ARCFACE_ALIGNED_SIZE};
use crate::detector::DetectorError;
use crate::locator::FaceAnalysis;
use crate::raster::{ChannelOrder, Image};
use crate::recognizer::{RecognizerError, ARCFACE_EMBEDDING_DIM};
use crate::registry::{ModelRegistry, Models};
use crate::swapper::{SwapModel, SwapperError, INSWAPPER_INPUT_SIZE};
use crate::types::{BoundingBox, Embedding, Landmarks};
use std::sync::Arc;

/// A square face box at (`x`, `y`) with landmarks in canonical positions.
pub(crate) fn face_at(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
    let scale = size / ARCFACE_ALIGNED_SIZE as f32;
    let canonical = reference_landmarks(ARCFACE_ALIGNED_SIZE);
    let mut landmarks: Landmarks = [(0.0, 0.0); 5];
    for (dst, (lx, ly)) in landmarks.iter_mut().zip(canonical) {
        *dst = (x + lx * scale, y + ly * scale);
    }
    BoundingBox { x, y, width: size, height: size, confidence, landmarks: Some(landmarks) }
}

enum Faces {
    /// One centered face, unless the top-left pixel is black.
    Centered,
    Fixed(Vec<BoundingBox>),
    Panic,
}

pub(crate) struct StubAnalysis {
    faces: Faces,
}

impl StubAnalysis {
    pub(crate) fn single_face() -> Self {
        Self { faces: Faces::Centered }
    }

    pub(crate) fn with_faces(faces: Vec<BoundingBox>) -> Self {
        Self { faces: Faces::Fixed(faces) }
    }

    pub(crate) fn panicking() -> Self {
        Self { faces: Faces::Panic }
    }
}

impl FaceAnalysis for StubAnalysis {
    fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, DetectorError> {
        match &self.faces {
            Faces::Centered => {
                if image.rgb_at(0, 0) == [0, 0, 0] {
                    return Ok(vec![]);
                }
                let (w, h) = (image.width() as f32, image.height() as f32);
                let size = w.min(h) / 2.0;
                Ok(vec![face_at((w - size) / 2.0, (h - size) / 2.0, size, 0.9)])
            }
            Faces::Fixed(faces) => Ok(faces.clone()),
            Faces::Panic => panic!("detector exploded"),
        }
    }

    fn embed(&mut self, _image: &Image, _landmarks: &Landmarks) -> Result<Embedding, RecognizerError> {
        let v = 1.0 / (ARCFACE_EMBEDDING_DIM as f32).sqrt();
        Ok(Embedding { values: vec![v; ARCFACE_EMBEDDING_DIM] })
    }
}

/// Returns a solid crop of one color for every swap, or always fails.
pub(crate) struct StubSwapper {
    outcome: Result<[u8; 3], String>,
}

impl StubSwapper {
    pub(crate) fn solid(rgb: [u8; 3]) -> Self {
        Self { outcome: Ok(rgb) }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self { outcome: Err(reason.to_string()) }
    }
}

impl SwapModel for StubSwapper {
    fn crop_size(&self) -> u32 {
        INSWAPPER_INPUT_SIZE
    }

    fn swap_crop(&mut self, crop: &Image, _source: &Embedding) -> Result<Image, SwapperError> {
        let rgb = self.outcome.clone().map_err(SwapperError::InferenceFailed)?;
        Image::filled(crop.width(), crop.height(), ChannelOrder::Rgb, rgb)
            .map_err(|e| SwapperError::InferenceFailed(e.to_string()))
    }
}

pub(crate) const SWAP_COLOR: [u8; 3] = [250, 10, 10];

/// A ready registry around `analysis` and a [`SWAP_COLOR`] swapper.
pub(crate) fn ready_registry(analysis: StubAnalysis) -> Arc<ModelRegistry> {
    ready_registry_with(analysis, StubSwapper::solid(SWAP_COLOR))
}

pub(crate) fn ready_registry_with(analysis: StubAnalysis, swapper: StubSwapper) -> Arc<ModelRegistry> {
    let registry = ModelRegistry::new();
    registry.initialize(|| {
        Ok(Models {
            analysis: Box::new(analysis),
            swapper: Box::new(swapper),
        })
    });
    Arc::new(registry)
}
