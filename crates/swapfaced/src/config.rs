use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use swapface_core::codec::DEFAULT_JPEG_QUALITY;
use swapface_core::{ModelPaths, OutputFormat, SelectionPolicy};

const DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000));
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket the HTTP listener binds (default: 0.0.0.0:5000).
    pub listen_addr: SocketAddr,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Ceiling on a whole `/process` request body.
    pub max_upload_bytes: usize,
    /// JPEG quality of the returned composite, 1-100.
    pub jpeg_quality: u8,
    /// Which face is used when an image holds several.
    pub face_selection: SelectionPolicy,
    /// ONNX Runtime intra-op threads per model session.
    pub intra_threads: usize,
}

impl Config {
    /// Load configuration from `SWAPFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let listen_addr = lookup("SWAPFACE_LISTEN_ADDR")
            .and_then(|v| match v.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!(value = %v, "invalid SWAPFACE_LISTEN_ADDR, using default");
                    None
                }
            })
            .unwrap_or(DEFAULT_LISTEN_ADDR);

        let face_selection = lookup("SWAPFACE_FACE_SELECTION")
            .and_then(|v| match v.parse::<SelectionPolicy>() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "invalid SWAPFACE_FACE_SELECTION, using default");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            listen_addr,
            model_dir: lookup("SWAPFACE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(swapface_core::default_model_dir),
            max_upload_bytes: env_parse(&lookup, "SWAPFACE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            jpeg_quality: env_parse(&lookup, "SWAPFACE_JPEG_QUALITY", DEFAULT_JPEG_QUALITY).clamp(1, 100),
            face_selection,
            intra_threads: env_parse(&lookup, "SWAPFACE_INTRA_THREADS", 2usize).max(1),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            intra_threads: self.intra_threads,
            ..ModelPaths::in_dir(&self.model_dir)
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::Jpeg {
            quality: self.jpeg_quality,
        }
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
