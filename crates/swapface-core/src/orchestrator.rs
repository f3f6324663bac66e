//! Request pipeline: validate → readiness → decode → locate → swap → encode.
//!
//! Every failure leaves as a typed [`ProcessError`]. Panics inside model
//! calls are caught here and reported as [`ProcessError::Unexpected`].

use crate::codec::{self, DecodeError, OutputFormat};
use crate::engine::{FaceSwapEngine, SwapError};
use crate::locator::{FaceLocator, LocateError};
use crate::raster::Image;
use crate::registry::{panic_message, ModelRegistry, NotReady};
use crate::types::SelectionPolicy;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// One uploaded file.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The two parts of a swap request, either possibly missing.
#[derive(Debug, Clone, Default)]
pub struct SwapRequest {
    pub source: Option<Upload>,
    pub target: Option<Upload>,
}

/// A successful swap.
#[derive(Debug, Clone)]
pub struct SwapOutput {
    pub image: Image,
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl SwapOutput {
    /// `data:<mime>;base64,<bytes>` form of the encoded composite.
    pub fn data_url(&self) -> String {
        codec::data_url(&self.bytes, self.format)
    }
}

/// Which of the two uploads a failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Source => "source",
            Side::Target => "target",
        })
    }
}

/// Failure category, for callers that map failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Decode,
    ModelNotReady,
    NoFaceInSource,
    NoFaceInTarget,
    Unexpected,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid {side} image: {cause}")]
    Decode {
        side: Side,
        #[source]
        cause: DecodeError,
    },
    #[error("{0}; try again shortly")]
    ModelNotReady(#[from] NotReady),
    #[error("no face detected in the {0} image")]
    NoFaceFound(Side),
    #[error("{0}")]
    Unexpected(String),
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Validation(_) => ErrorKind::Validation,
            ProcessError::Decode { .. } => ErrorKind::Decode,
            ProcessError::ModelNotReady(_) => ErrorKind::ModelNotReady,
            ProcessError::NoFaceFound(Side::Source) => ErrorKind::NoFaceInSource,
            ProcessError::NoFaceFound(Side::Target) => ErrorKind::NoFaceInTarget,
            ProcessError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    fn from_locate(err: LocateError, side: Side) -> Self {
        match err {
            LocateError::NoFaceFound => ProcessError::NoFaceFound(side),
            LocateError::ModelNotReady(not_ready) => ProcessError::ModelNotReady(not_ready),
            other => ProcessError::Unexpected(format!("{side} face analysis failed: {other}")),
        }
    }
}

impl From<SwapError> for ProcessError {
    fn from(err: SwapError) -> Self {
        match err {
            SwapError::ModelNotReady(not_ready) => ProcessError::ModelNotReady(not_ready),
            other => ProcessError::Unexpected(format!("face swap failed: {other}")),
        }
    }
}

/// Sequences codec, locator and swap engine for one request at a time.
pub struct RequestOrchestrator {
    registry: Arc<ModelRegistry>,
    locator: FaceLocator,
    engine: FaceSwapEngine,
    format: OutputFormat,
}

impl RequestOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, policy: SelectionPolicy, format: OutputFormat) -> Self {
        Self {
            locator: FaceLocator::new(registry.clone(), policy),
            engine: FaceSwapEngine::new(registry.clone()),
            registry,
            format,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Run the full pipeline for one request.
    pub fn process(&self, request: SwapRequest) -> Result<SwapOutput, ProcessError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("process", %request_id);
        let _enter = span.enter();
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(request))).unwrap_or_else(|payload| {
            Err(ProcessError::Unexpected(format!(
                "internal error: {}",
                panic_message(&payload)
            )))
        });

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(output) => tracing::info!(elapsed_ms, bytes = output.bytes.len(), "swap complete"),
            Err(e) => tracing::warn!(elapsed_ms, kind = ?e.kind(), error = %e, "swap failed"),
        }
        result
    }

    fn run(&self, request: SwapRequest) -> Result<SwapOutput, ProcessError> {
        let (source, target) = validate(request)?;
        self.registry.ensure_ready()?;

        let started = Instant::now();
        let source_image = codec::decode(&source.bytes)
            .map_err(|cause| ProcessError::Decode { side: Side::Source, cause })?;
        let target_image = codec::decode(&target.bytes)
            .map_err(|cause| ProcessError::Decode { side: Side::Target, cause })?;
        tracing::debug!(
            source = %source.filename,
            target = %target.filename,
            source_size = ?source_image.dimensions(),
            target_size = ?target_image.dimensions(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "uploads decoded"
        );

        self.process_images(&source_image, &target_image)
    }

    /// Swap the primary face of `source` onto the primary face of `target`.
    pub fn process_images(&self, source: &Image, target: &Image) -> Result<SwapOutput, ProcessError> {
        let started = Instant::now();
        let source_face = self
            .locator
            .locate(source)
            .map_err(|e| ProcessError::from_locate(e, Side::Source))?;
        let target_face = self
            .locator
            .locate(target)
            .map_err(|e| ProcessError::from_locate(e, Side::Target))?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "faces located");

        let started = Instant::now();
        let image = self.engine.swap(target, &target_face, &source_face)?;
        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "face swapped");

        let bytes = codec::encode(&image, self.format)
            .map_err(|e| ProcessError::Unexpected(format!("encoding result failed: {e}")))?;
        Ok(SwapOutput { image, bytes, format: self.format })
    }
}

fn validate(request: SwapRequest) -> Result<(Upload, Upload), ProcessError> {
    let (Some(source), Some(target)) = (request.source, request.target) else {
        return Err(ProcessError::Validation(
            "both source and target images are required".to_string(),
        ));
    };
    for (side, upload) in [(Side::Source, &source), (Side::Target, &target)] {
        if upload.filename.trim().is_empty() {
            return Err(ProcessError::Validation(format!("no file selected for the {side} image")));
        }
    }
    Ok((source, target))
}
