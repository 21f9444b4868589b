//! Pipeline tuning and model file locations.

use crate::classifier::ClassifierConfig;
use crate::decision::DecisionPolicy;
use crate::locator::LocatorParams;
use crate::normalizer::NormalizerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CLASSIFIER_MODEL_FILE: &str = "stress_model.onnx";
pub const CASCADE_MODEL_FILE: &str = "haarcascade_frontalface_default.xml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

/// Every tunable of the pipeline. Missing TOML sections and keys take the
/// shipped defaults.
///
/// ```toml
/// [locator]
/// scale_factor = 1.3
/// min_neighbors = 5
///
/// [normalizer]
/// channel_order = "rgb"
/// preprocessing = "tf"
///
/// [classifier]
/// layout = "nhwc"
///
/// [policy]
/// stress_threshold = 0.6
/// non_stress_threshold = 0.6
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub locator: LocatorParams,
    pub normalizer: NormalizerConfig,
    pub classifier: ClassifierConfig,
    pub policy: DecisionPolicy,
}

impl PipelineConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.locator
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.normalizer.input_size == 0 {
            return Err(ConfigError::Invalid("normalizer.input_size must be at least 1".into()));
        }
        if self.classifier.intra_threads == 0 {
            return Err(ConfigError::Invalid("classifier.intra_threads must be at least 1".into()));
        }
        Ok(())
    }
}

/// Locations of the two pretrained artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub classifier: PathBuf,
    pub cascade: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            classifier: dir.join(CLASSIFIER_MODEL_FILE),
            cascade: dir.join(CASCADE_MODEL_FILE),
        }
    }
}

/// `$XDG_DATA_HOME/stressguard/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("stressguard")
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TensorLayout;
    use crate::normalizer::Preprocessing;

    #[test]
    fn test_empty_toml_is_default() {
        let cfg: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            [locator]
            min_neighbors = 3

            [normalizer]
            preprocessing = "torch"

            [classifier]
            layout = "nchw"

            [policy]
            non_stress_threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.locator.min_neighbors, 3);
        assert_eq!(cfg.locator.scale_factor, 1.3);
        assert_eq!(cfg.normalizer.preprocessing, Preprocessing::Torch);
        assert_eq!(cfg.classifier.layout, TensorLayout::Nchw);
        assert_eq!(cfg.policy.non_stress_threshold, 0.7);
        assert_eq!(cfg.policy.stress_threshold, 0.6);
    }

    #[test]
    fn test_unknown_preprocessing_rejected() {
        let result: Result<PipelineConfig, _> = toml::from_str("[normalizer]\npreprocessing = \"yolo\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        assert!(PipelineConfig::default().validate().is_ok());

        let zero_size: PipelineConfig = toml::from_str("[normalizer]\ninput_size = 0").unwrap();
        assert!(matches!(zero_size.validate(), Err(ConfigError::Invalid(_))));

        let flat_pyramid: PipelineConfig = toml::from_str("[locator]\nscale_factor = 1.0").unwrap();
        assert!(matches!(flat_pyramid.validate(), Err(ConfigError::Invalid(_))));

        let no_threads: PipelineConfig = toml::from_str("[classifier]\nintra_threads = 0").unwrap();
        assert!(matches!(no_threads.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_file_with_zero_input_size_rejected() {
        let path = std::env::temp_dir().join(format!("stressguard-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[normalizer]\ninput_size = 0\n").unwrap();
        let result = PipelineConfig::from_toml_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_toml_file("/nonexistent/stressguard.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir("/opt/models");
        assert_eq!(paths.classifier, PathBuf::from("/opt/models/stress_model.onnx"));
        assert_eq!(
            paths.cascade,
            PathBuf::from("/opt/models/haarcascade_frontalface_default.xml")
        );
    }
}
