use anyhow::Result;
use std::sync::Arc;
use swapface_core::{HealthReporter, ModelPaths, ModelRegistry, RequestOrchestrator};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        model_dir = %config.model_dir.display(),
        face_selection = ?config.face_selection,
        "swapfaced starting"
    );

    let registry = Arc::new(ModelRegistry::new());
    spawn_model_loader(registry.clone(), config.model_paths())?;

    let orchestrator = Arc::new(RequestOrchestrator::new(
        registry.clone(),
        config.face_selection,
        config.output_format(),
    ));
    let state = Arc::new(routes::AppState {
        orchestrator,
        health: HealthReporter::new(registry),
    });
    let app = routes::build_router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("swapfaced shutting down");
    Ok(())
}

/// Load models off the async runtime so `/health` can answer while they load.
fn spawn_model_loader(registry: Arc<ModelRegistry>, paths: ModelPaths) -> Result<()> {
    std::thread::Builder::new()
        .name("swapface-loader".into())
        .spawn(move || {
            registry.initialize_onnx(&paths);
        })?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
