//! stressguard-core: facial stress classification pipeline.
//!
//! Locates frontal faces with a Haar cascade, normalizes each face crop into
//! the classifier's input tensor, runs a three-class (non-stress, stress,
//! neutral) ONNX model, and applies an ordered threshold policy to pick a
//! label per face.

pub mod cascade;
pub mod classifier;
pub mod config;
pub mod decision;
pub mod input;
pub mod locator;
pub mod normalizer;
#[cfg(feature = "opencv")]
pub mod opencv_locator;
pub mod pipeline;
pub mod types;

pub use classifier::{Classifier, InferenceError, OnnxClassifier};
pub use config::{default_model_dir, ModelPaths, PipelineConfig};
pub use decision::{decide, DecisionPolicy};
pub use locator::{CascadeLocator, FaceLocator, LocatorParams};
pub use normalizer::{normalize, FaceTensor, NormalizerConfig};
#[cfg(feature = "opencv")]
pub use opencv_locator::OpencvLocator;
pub use pipeline::{LoadError, StressClassifier, StressError};
pub use types::{ClassProbabilities, Envelope, FaceRegion, FaceResult, PredictionOutcome, StressLabel};
