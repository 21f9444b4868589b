use std::path::PathBuf;
use stressguard_core::config::{CASCADE_MODEL_FILE, CLASSIFIER_MODEL_FILE};
use stressguard_core::{ModelPaths, PipelineConfig};

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the classifier and cascade files.
    pub model_dir: PathBuf,
    /// ONNX stress classifier (default: `<model_dir>/stress_model.onnx`).
    pub classifier_model: PathBuf,
    /// Haar cascade XML (default: `<model_dir>/haarcascade_frontalface_default.xml`).
    pub cascade_model: PathBuf,
    /// Optional TOML file with pipeline tuning.
    pub pipeline_config: Option<PathBuf>,
    /// Upper bound in seconds for a single prediction request.
    pub inference_timeout_secs: u64,
    pub bus: BusKind,
    /// ONNX Runtime intra-op threads; overrides the TOML value when set.
    pub intra_threads: Option<usize>,
}

impl Config {
    /// Load configuration from `STRESSGUARD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("STRESSGUARD_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| stressguard_core::default_model_dir());

        let classifier_model = std::env::var("STRESSGUARD_CLASSIFIER_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(CLASSIFIER_MODEL_FILE));
        let cascade_model = std::env::var("STRESSGUARD_CASCADE_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| model_dir.join(CASCADE_MODEL_FILE));

        Self {
            model_dir,
            classifier_model,
            cascade_model,
            pipeline_config: std::env::var("STRESSGUARD_CONFIG").ok().map(PathBuf::from),
            inference_timeout_secs: env_u64("STRESSGUARD_INFERENCE_TIMEOUT_SECS", 30),
            bus: match std::env::var("STRESSGUARD_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
            intra_threads: std::env::var("STRESSGUARD_INTRA_THREADS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            classifier: self.classifier_model.clone(),
            cascade: self.cascade_model.clone(),
        }
    }

    /// Pipeline tuning from the TOML file, or defaults when none is set.
    pub fn pipeline(&self) -> anyhow::Result<PipelineConfig> {
        let mut pipeline = match &self.pipeline_config {
            Some(path) => PipelineConfig::from_toml_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(threads) = self.intra_threads {
            pipeline.classifier.intra_threads = threads;
        }
        Ok(pipeline)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
