//! Detection-to-decision pipeline.

use crate::cascade::CascadeError;
use crate::classifier::{Classifier, InferenceError, OnnxClassifier};
use crate::config::{ConfigError, ModelPaths, PipelineConfig};
use crate::decision::DecisionPolicy;
use crate::input::{self, DecodeError};
use crate::locator::{FaceLocator, LocateError};
use crate::normalizer::{self, NormalizeError, NormalizerConfig};
use crate::types::{FaceRegion, FaceResult, PredictionOutcome};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StressError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("empty face region at ({}, {}) size {}x{}", .0.x, .0.y, .0.width, .0.height)]
    EmptyRegion(FaceRegion),
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
}

impl From<LocateError> for StressError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::InvalidImage { .. } => StressError::InvalidImage(err.to_string()),
            LocateError::Backend(reason) => StressError::Detection(reason),
        }
    }
}

impl From<NormalizeError> for StressError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::EmptyRegion(region) => StressError::EmptyRegion(region),
        }
    }
}

impl From<DecodeError> for StressError {
    fn from(err: DecodeError) -> Self {
        StressError::InvalidImage(err.0)
    }
}

/// Startup failures while loading the pretrained artifacts.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("face detector: {0}")]
    Cascade(#[from] CascadeError),
    #[error("classifier: {0}")]
    Classifier(#[from] InferenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(feature = "opencv")]
const DETECTOR_BACKEND: &str = "opencv";
#[cfg(not(feature = "opencv"))]
const DETECTOR_BACKEND: &str = "native";

#[cfg(feature = "opencv")]
fn load_locator(paths: &ModelPaths, config: &PipelineConfig) -> Result<Box<dyn FaceLocator>, CascadeError> {
    let locator = crate::opencv_locator::OpencvLocator::load(&paths.cascade, config.locator.clone())?;
    Ok(Box::new(locator))
}

#[cfg(not(feature = "opencv"))]
fn load_locator(paths: &ModelPaths, config: &PipelineConfig) -> Result<Box<dyn FaceLocator>, CascadeError> {
    let locator = crate::locator::CascadeLocator::load(&paths.cascade, config.locator.clone())?;
    Ok(Box::new(locator))
}

/// Face locator, normalizer settings, classifier, and decision policy,
/// constructed once and shared read-only by every request.
pub struct StressClassifier {
    locator: Box<dyn FaceLocator>,
    classifier: Box<dyn Classifier>,
    normalizer: NormalizerConfig,
    policy: DecisionPolicy,
}

impl StressClassifier {
    pub fn new(
        locator: Box<dyn FaceLocator>,
        classifier: Box<dyn Classifier>,
        normalizer: NormalizerConfig,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            locator,
            classifier,
            normalizer,
            policy,
        }
    }

    /// Load the Haar cascade and ONNX classifier named by `paths`.
    pub fn load(paths: &ModelPaths, config: &PipelineConfig) -> Result<Self, LoadError> {
        config.validate()?;
        let locator = load_locator(paths, config)?;
        let classifier = OnnxClassifier::load(&paths.classifier, &config.classifier)?;

        tracing::info!(
            detector = DETECTOR_BACKEND,
            cascade = %paths.cascade.display(),
            classifier = %paths.classifier.display(),
            scale_factor = config.locator.scale_factor,
            min_neighbors = config.locator.min_neighbors,
            channel_order = ?config.normalizer.channel_order,
            preprocessing = ?config.normalizer.preprocessing,
            stress_threshold = config.policy.stress_threshold,
            non_stress_threshold = config.policy.non_stress_threshold,
            "stress classifier ready"
        );

        Ok(Self::new(
            locator,
            Box::new(classifier),
            config.normalizer.clone(),
            config.policy,
        ))
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn normalizer(&self) -> &NormalizerConfig {
        &self.normalizer
    }

    /// Classify every face in a decoded image, in detection order.
    ///
    /// An image without faces yields an empty list. Any failure aborts the
    /// whole call; results are never partially returned.
    pub fn predict_stress(&self, image: &RgbImage) -> Result<Vec<FaceResult>, StressError> {
        let regions = self.locator.locate(image)?;
        if regions.is_empty() {
            tracing::debug!(width = image.width(), height = image.height(), "no face detected");
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(regions.len());
        for (index, region) in regions.iter().enumerate() {
            let tensor = normalizer::normalize(image, region, &self.normalizer)?;
            let probs = self.classifier.infer(&tensor)?;
            let result = self.policy.decide(probs);
            tracing::debug!(
                face = index,
                x = region.x,
                y = region.y,
                width = region.width,
                height = region.height,
                label = %result.label,
                confidence = result.confidence,
                "face classified"
            );
            results.push(result);
        }

        Ok(results)
    }

    /// Decode encoded image bytes and classify them.
    ///
    /// Undecodable input is reported as [`PredictionOutcome::DecodeFailure`],
    /// never as an empty face list.
    pub fn predict_encoded(&self, bytes: &[u8]) -> Result<PredictionOutcome, StressError> {
        let image = match input::decode_image(bytes) {
            Ok(image) => image,
            Err(DecodeError(reason)) => {
                tracing::warn!(bytes = bytes.len(), %reason, "image decode failed");
                return Ok(PredictionOutcome::DecodeFailure { reason });
            }
        };
        self.predict_stress(&image).map(PredictionOutcome::Faces)
    }

    /// Classify a base64 payload, optionally prefixed with a data URL header.
    pub fn predict_base64(&self, payload: &str) -> Result<PredictionOutcome, StressError> {
        match input::decode_base64_payload(payload) {
            Ok(bytes) => self.predict_encoded(&bytes),
            Err(DecodeError(reason)) => {
                tracing::warn!(len = payload.len(), %reason, "payload decode failed");
                Ok(PredictionOutcome::DecodeFailure { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassProbabilities, StressLabel};

    struct FixedLocator(Vec<FaceRegion>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, LocateError> {
            if image.width() == 0 || image.height() == 0 {
                return Err(LocateError::InvalidImage {
                    width: image.width(),
                    height: image.height(),
                });
            }
            Ok(self.0.clone())
        }
    }

    struct ConstClassifier(ClassProbabilities);

    impl Classifier for ConstClassifier {
        fn infer(&self, _tensor: &normalizer::FaceTensor) -> Result<ClassProbabilities, InferenceError> {
            Ok(self.0)
        }
    }

    fn pipeline(regions: Vec<FaceRegion>, probs: ClassProbabilities) -> StressClassifier {
        StressClassifier::new(
            Box::new(FixedLocator(regions)),
            Box::new(ConstClassifier(probs)),
            NormalizerConfig::default(),
            DecisionPolicy::default(),
        )
    }

    #[test]
    fn test_one_result_per_region() {
        let p = pipeline(
            vec![FaceRegion::new(0, 0, 20, 20), FaceRegion::new(20, 20, 30, 30)],
            ClassProbabilities::new(0.1, 0.8, 0.1),
        );
        let results = p.predict_stress(&RgbImage::new(64, 64)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.label == StressLabel::Stress));
    }

    struct BrokenLocator;

    impl FaceLocator for BrokenLocator {
        fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, LocateError> {
            Err(LocateError::Backend("cascade not loaded".into()))
        }
    }

    #[test]
    fn test_detector_failure_is_not_invalid_image() {
        let p = StressClassifier::new(
            Box::new(BrokenLocator),
            Box::new(ConstClassifier(ClassProbabilities::new(0.0, 0.0, 1.0))),
            NormalizerConfig::default(),
            DecisionPolicy::default(),
        );
        assert!(matches!(
            p.predict_stress(&RgbImage::new(8, 8)),
            Err(StressError::Detection(ref m)) if m == "cascade not loaded"
        ));
    }

    #[test]
    fn test_zero_sized_image_is_invalid() {
        let p = pipeline(vec![], ClassProbabilities::new(0.0, 0.0, 1.0));
        assert!(matches!(
            p.predict_stress(&RgbImage::new(0, 0)),
            Err(StressError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_empty_region_aborts() {
        let p = pipeline(
            vec![FaceRegion::new(0, 0, 10, 10), FaceRegion::new(5, 5, 0, 8)],
            ClassProbabilities::new(0.9, 0.0, 0.1),
        );
        assert!(matches!(
            p.predict_stress(&RgbImage::new(32, 32)),
            Err(StressError::EmptyRegion(r)) if r == FaceRegion::new(5, 5, 0, 8)
        ));
    }

    #[test]
    fn test_load_rejects_zero_input_size_before_reading_models() {
        let mut config = PipelineConfig::default();
        config.normalizer.input_size = 0;
        let paths = ModelPaths::in_dir("/nonexistent/models");
        assert!(matches!(
            StressClassifier::load(&paths, &config),
            Err(LoadError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn test_base64_garbage_is_decode_failure() {
        let p = pipeline(vec![], ClassProbabilities::new(0.0, 0.0, 1.0));
        let outcome = p.predict_base64("data:image/png;base64,!!!").unwrap();
        assert!(matches!(outcome, PredictionOutcome::DecodeFailure { .. }));
    }
}
