use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swapface_core::codec::{self, DEFAULT_JPEG_QUALITY};
use swapface_core::{
    HealthReporter, ModelPaths, ModelRegistry, ModelState, RequestOrchestrator, SelectionPolicy,
    SwapRequest, Upload,
};

#[derive(Parser)]
#[command(name = "swapface", about = "Offline face swap and model diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap the face from one image onto another
    Swap {
        /// Image holding the face to transplant
        #[arg(short, long)]
        source: PathBuf,
        /// Image that receives the face
        #[arg(short, long)]
        target: PathBuf,
        /// Where to write the composite (.png for PNG, otherwise JPEG)
        #[arg(short, long)]
        output: PathBuf,
        /// Directory holding the ONNX models
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Face to use when an image holds several: confidence | largest
        #[arg(long, default_value = "confidence")]
        selection: SelectionPolicy,
        /// JPEG quality, 1-100
        #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,
    },
    /// Load the models and report whether they are usable
    Models {
        /// Directory holding the ONNX models
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Swap {
            source,
            target,
            output,
            model_dir,
            selection,
            quality,
        } => {
            let registry = load_models(model_dir);
            if registry.state() != ModelState::Ready {
                bail!(
                    "models failed to load: {}",
                    registry.failure().unwrap_or("unknown cause")
                );
            }

            let format = codec::format_for_path(&output, quality);
            let orchestrator = RequestOrchestrator::new(registry, selection, format);
            let request = SwapRequest {
                source: Some(read_upload(&source)?),
                target: Some(read_upload(&target)?),
            };

            let result = orchestrator.process(request)?;
            std::fs::write(&output, &result.bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            let (width, height) = result.image.dimensions();
            println!("wrote {} ({width}x{height}, {})", output.display(), format.mime_type());
        }
        Commands::Models { model_dir } => {
            let registry = load_models(model_dir);
            let report = HealthReporter::new(registry).health();
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.models_loaded {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_models(model_dir: Option<PathBuf>) -> Arc<ModelRegistry> {
    let dir = model_dir.unwrap_or_else(swapface_core::default_model_dir);
    tracing::info!(model_dir = %dir.display(), "loading models");
    let registry = Arc::new(ModelRegistry::new());
    registry.initialize_onnx(&ModelPaths::in_dir(&dir));
    registry
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload { filename, bytes })
}
