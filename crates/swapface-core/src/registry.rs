//! Process-wide model lifecycle.
//!
//! The registry is created empty (`Loading`), initialized exactly once, and
//! from then on reports `Ready` or `Failed` forever. There is no retry: a
//! failed load needs a process restart.
//!
//! ONNX sessions need `&mut` access to run, so each model handle sits behind
//! its own mutex and concurrent requests take turns per model.

use crate::detector::{DetectorError, DetectorOptions, FaceDetector};
use crate::locator::{FaceAnalysis, OnnxFaceAnalysis};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::swapper::{InSwapper, SwapModel, SwapperError};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use thiserror::Error;

/// Readiness of the model set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Loading,
    Ready,
    Failed,
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("swapper: {0}")]
    Swapper(#[from] SwapperError),
}

/// Why a request cannot use the models right now.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    #[error("models are still loading")]
    Loading,
    #[error("models failed to load: {0}")]
    Failed(String),
}

/// File locations of the pretrained assets.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub swapper: PathBuf,
    pub emap: PathBuf,
    pub intra_threads: usize,
}

impl ModelPaths {
    /// Standard file names inside one model directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join("det_10g.onnx"),
            recognizer: dir.join("w600k_r50.onnx"),
            swapper: dir.join("inswapper_128.onnx"),
            emap: dir.join("inswapper_128.emap"),
            intra_threads: 2,
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/swapface/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("swapface/models")
}

/// A freshly loaded model set, handed to [`ModelRegistry::initialize`].
pub struct Models {
    pub analysis: Box<dyn FaceAnalysis>,
    pub swapper: Box<dyn SwapModel>,
}

struct LoadedModels {
    analysis: Mutex<Box<dyn FaceAnalysis>>,
    swapper: Mutex<Box<dyn SwapModel>>,
}

/// Owner of the face-analysis and swap models.
#[derive(Default)]
pub struct ModelRegistry {
    slot: OnceLock<Result<LoadedModels, String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `load` once and record the outcome.
    ///
    /// Later calls do nothing and return the recorded state. A panicking
    /// loader counts as a failed load.
    pub fn initialize<F>(&self, load: F) -> ModelState
    where
        F: FnOnce() -> Result<Models, ModelLoadError>,
    {
        let mut ran = false;
        self.slot.get_or_init(|| {
            ran = true;
            let started = Instant::now();
            tracing::info!("loading models");

            let outcome = match panic::catch_unwind(AssertUnwindSafe(load)) {
                Ok(Ok(models)) => Ok(LoadedModels {
                    analysis: Mutex::new(models.analysis),
                    swapper: Mutex::new(models.swapper),
                }),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(format!("model loader panicked: {}", panic_message(&payload))),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => tracing::info!(elapsed_ms, "models ready"),
                Err(cause) => tracing::error!(elapsed_ms, %cause, "model loading failed; restart required"),
            }
            outcome
        });

        if !ran {
            tracing::warn!("model registry already initialized; ignoring repeat call");
        }
        self.state()
    }

    /// Load the ONNX model set from disk.
    pub fn initialize_onnx(&self, paths: &ModelPaths) -> ModelState {
        self.initialize(|| {
            let detector = FaceDetector::load(
                &paths.detector,
                DetectorOptions {
                    intra_threads: paths.intra_threads,
                    ..DetectorOptions::default()
                },
            )?;
            let recognizer = FaceRecognizer::load(&paths.recognizer, paths.intra_threads)?;
            let swapper = InSwapper::load(&paths.swapper, &paths.emap, paths.intra_threads)?;
            Ok(Models {
                analysis: Box::new(OnnxFaceAnalysis::new(detector, recognizer)),
                swapper: Box::new(swapper),
            })
        })
    }

    /// Current state. Never blocks, even while loading is in progress.
    pub fn state(&self) -> ModelState {
        match self.slot.get() {
            None => ModelState::Loading,
            Some(Ok(_)) => ModelState::Ready,
            Some(Err(_)) => ModelState::Failed,
        }
    }

    /// The recorded load failure, if any.
    pub fn failure(&self) -> Option<&str> {
        match self.slot.get() {
            Some(Err(cause)) => Some(cause),
            _ => None,
        }
    }

    pub fn ensure_ready(&self) -> Result<(), NotReady> {
        self.models().map(|_| ())
    }

    fn models(&self) -> Result<&LoadedModels, NotReady> {
        match self.slot.get() {
            None => Err(NotReady::Loading),
            Some(Ok(models)) => Ok(models),
            Some(Err(cause)) => Err(NotReady::Failed(cause.clone())),
        }
    }

    /// Run `f` with exclusive access to the face-analysis models.
    pub(crate) fn with_analysis<R>(
        &self,
        f: impl FnOnce(&mut dyn FaceAnalysis) -> R,
    ) -> Result<R, NotReady> {
        let models = self.models()?;
        let mut guard = models.analysis.lock();
        Ok(f(guard.as_mut()))
    }

    /// Run `f` with exclusive access to the swap model.
    pub(crate) fn with_swapper<R>(
        &self,
        f: impl FnOnce(&mut dyn SwapModel) -> R,
    ) -> Result<R, NotReady> {
        let models = self.models()?;
        let mut guard = models.swapper.lock();
        Ok(f(guard.as_mut()))
    }
}

pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
