//! Primary-face location: detect, select, embed.

use crate::detector::{DetectorError, FaceDetector};
use crate::raster::Image;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::registry::{ModelRegistry, NotReady};
use crate::types::{BoundingBox, Embedding, FaceDescriptor, Landmarks, SelectionPolicy};
use std::sync::Arc;
use thiserror::Error;

/// Detection plus identity embedding, as one unit of model access.
pub trait FaceAnalysis: Send {
    /// Face candidates in descending confidence order.
    fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, DetectorError>;

    /// L2-normalized identity embedding for the face at `landmarks`.
    fn embed(&mut self, image: &Image, landmarks: &Landmarks) -> Result<Embedding, RecognizerError>;
}

/// SCRFD + ArcFace.
pub struct OnnxFaceAnalysis {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalysis {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }
}

impl FaceAnalysis for OnnxFaceAnalysis {
    fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, DetectorError> {
        self.detector.detect(image)
    }

    fn embed(&mut self, image: &Image, landmarks: &Landmarks) -> Result<Embedding, RecognizerError> {
        self.recognizer.extract(image, landmarks)
    }
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error(transparent)]
    ModelNotReady(#[from] NotReady),
    #[error("no face found")]
    NoFaceFound,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds the primary face of an image and describes it.
pub struct FaceLocator {
    registry: Arc<ModelRegistry>,
    policy: SelectionPolicy,
}

impl FaceLocator {
    pub fn new(registry: Arc<ModelRegistry>, policy: SelectionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Locate the primary face under the configured selection policy.
    ///
    /// Candidates without landmarks cannot be aligned and are skipped.
    pub fn locate(&self, image: &Image) -> Result<FaceDescriptor, LocateError> {
        self.registry.with_analysis(|models| {
            let detections = models.detect(image)?;
            let detected = detections.len();
            let (mut candidates, points): (Vec<BoundingBox>, Vec<Landmarks>) = detections
                .into_iter()
                .filter_map(|c| c.landmarks.map(|lm| (c, lm)))
                .unzip();

            let index = self.policy.select(&candidates).ok_or(LocateError::NoFaceFound)?;
            let landmarks = points[index];
            let bbox = candidates.swap_remove(index);
            let embedding = models.embed(image, &landmarks)?;

            tracing::debug!(
                detected,
                usable = points.len(),
                confidence = bbox.confidence,
                policy = ?self.policy,
                "primary face located"
            );

            Ok(FaceDescriptor { bbox, landmarks, embedding })
        })?
    }
}
