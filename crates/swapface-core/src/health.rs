use crate::registry::{ModelRegistry, ModelState};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Loading,
    Failed,
}

/// Public health payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub models_loaded: bool,
    pub message: String,
}

/// Derives [`HealthReport`]s from registry state. Never blocks.
#[derive(Clone)]
pub struct HealthReporter {
    registry: Arc<ModelRegistry>,
}

impl HealthReporter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn health(&self) -> HealthReport {
        match self.registry.state() {
            ModelState::Ready => HealthReport {
                status: HealthStatus::Healthy,
                models_loaded: true,
                message: "ready".to_string(),
            },
            ModelState::Loading => HealthReport {
                status: HealthStatus::Loading,
                models_loaded: false,
                message: "models are loading".to_string(),
            },
            ModelState::Failed => HealthReport {
                status: HealthStatus::Failed,
                models_loaded: false,
                message: format!(
                    "model loading failed: {}",
                    self.registry.failure().unwrap_or("unknown cause")
                ),
            },
        }
    }
}
