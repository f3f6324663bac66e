//! swapface-core: face swap pipeline.
//!
//! SCRFD finds faces, ArcFace turns the source face into an identity
//! embedding, and inswapper renders that identity onto the target face. All
//! three run via ONNX Runtime on the CPU.

pub mod alignment;
pub mod codec;
pub mod detector;
pub mod engine;
pub mod health;
pub mod locator;
pub mod orchestrator;
pub mod raster;
pub mod recognizer;
pub mod registry;
pub mod swapper;
pub mod types;

#[cfg(test)]
mod testing;

pub use codec::OutputFormat;
pub use health::{HealthReport, HealthReporter, HealthStatus};
pub use locator::FaceAnalysis;
pub use orchestrator::{ErrorKind, ProcessError, RequestOrchestrator, Side, SwapOutput, SwapRequest, Upload};
pub use raster::{ChannelOrder, Image};
pub use registry::{default_model_dir, ModelPaths, ModelRegistry, ModelState, Models};
pub use swapper::SwapModel;
pub use types::{BoundingBox, Embedding, FaceDescriptor, Landmarks, SelectionPolicy};
