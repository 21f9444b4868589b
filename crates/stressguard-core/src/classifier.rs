//! Three-class stress classifier via ONNX Runtime.
//!
//! Wraps a pretrained (non-stress, stress, neutral) image classifier exported
//! to ONNX. The session needs exclusive access to run, so calls are serialized
//! behind a mutex; the model itself is never modified after load.

use crate::normalizer::FaceTensor;
use crate::types::ClassProbabilities;
use ndarray::{Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;

const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("input tensor must be square HxWx3, got {0:?}")]
    InputShape(Vec<usize>),
    #[error("classifier returned {0} scores, expected 3")]
    OutputShape(usize),
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("classifier session lock poisoned by an earlier panic")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces class scores for one normalized face tensor.
pub trait Classifier: Send + Sync {
    fn infer(&self, tensor: &FaceTensor) -> Result<ClassProbabilities, InferenceError>;
}

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// 1 × H × W × 3 (Keras / TensorFlow exports).
    #[default]
    Nhwc,
    /// 1 × 3 × H × W (PyTorch exports).
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub layout: TensorLayout,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            layout: TensorLayout::Nhwc,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }
}

/// ONNX-backed classifier.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    layout: TensorLayout,
}

impl OnnxClassifier {
    /// Load the classifier ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>, config: &ClassifierConfig) -> Result<Self, InferenceError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            layout = ?config.layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded stress classifier"
        );

        Ok(Self {
            session: Mutex::new(session),
            layout: config.layout,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, tensor: &FaceTensor) -> Result<ClassProbabilities, InferenceError> {
        let input = to_input_batch(tensor, self.layout)?;
        let started = Instant::now();

        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Failed(format!("class scores: {e}")))?;

        let probs = ClassProbabilities::from_slice(scores).ok_or(InferenceError::OutputShape(scores.len()))?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            non_stress = probs.non_stress,
            stress = probs.stress,
            neutral = probs.neutral,
            "classifier inference"
        );

        Ok(probs)
    }
}

/// Add the batch axis and arrange channels for the model's layout.
fn to_input_batch(tensor: &FaceTensor, layout: TensorLayout) -> Result<Array4<f32>, InferenceError> {
    let shape = tensor.shape();
    if shape[2] != 3 || shape[0] != shape[1] || shape[0] == 0 {
        return Err(InferenceError::InputShape(shape.to_vec()));
    }

    let batch = match layout {
        TensorLayout::Nhwc => tensor.view().insert_axis(Axis(0)).to_owned(),
        TensorLayout::Nchw => tensor
            .view()
            .permuted_axes([2, 0, 1])
            .insert_axis(Axis(0))
            .as_standard_layout()
            .into_owned(),
    };
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_tensor(size: usize) -> FaceTensor {
        FaceTensor::from_shape_fn((size, size, 3), |(y, x, c)| (y * 100 + x * 10 + c) as f32)
    }

    #[test]
    fn test_nhwc_batch() {
        let batch = to_input_batch(&ramp_tensor(4), TensorLayout::Nhwc).unwrap();
        assert_eq!(batch.shape(), &[1, 4, 4, 3]);
        assert_eq!(batch[[0, 2, 1, 2]], 212.0);
        assert!(batch.is_standard_layout());
    }

    #[test]
    fn test_nchw_batch() {
        let batch = to_input_batch(&ramp_tensor(4), TensorLayout::Nchw).unwrap();
        assert_eq!(batch.shape(), &[1, 3, 4, 4]);
        // channel 2, y=1, x=3
        assert_eq!(batch[[0, 2, 1, 3]], 132.0);
        assert!(batch.is_standard_layout());
    }

    #[test]
    fn test_rejects_bad_shape() {
        let wrong_channels = FaceTensor::zeros((4, 4, 1));
        assert!(matches!(
            to_input_batch(&wrong_channels, TensorLayout::Nhwc),
            Err(InferenceError::InputShape(_))
        ));
        let not_square = FaceTensor::zeros((4, 5, 3));
        assert!(to_input_batch(&not_square, TensorLayout::Nhwc).is_err());
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxClassifier::load("/nonexistent/stress_model.onnx", &ClassifierConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, InferenceError::ModelNotFound(_)));
    }

    #[test]
    fn test_layout_from_toml() {
        let cfg: ClassifierConfig = toml::from_str("layout = \"nchw\"").unwrap();
        assert_eq!(cfg.layout, TensorLayout::Nchw);
        assert_eq!(cfg.intra_threads, DEFAULT_INTRA_THREADS);
    }
}
