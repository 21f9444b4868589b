use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face rectangle in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersect with a `width` × `height` image. Returns `None` when nothing overlaps.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.x.saturating_add(self.width).min(width);
        let y1 = self.y.saturating_add(self.height).min(height);
        let clamped = FaceRegion::new(x0, y0, x1 - x0, y1 - y0);
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// Raw classifier output, in the model's output order (non-stress, stress, neutral).
///
/// Scores are not assumed to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    #[serde(rename = "Non-Stress")]
    pub non_stress: f32,
    #[serde(rename = "Stress")]
    pub stress: f32,
    #[serde(rename = "Neutral")]
    pub neutral: f32,
}

impl ClassProbabilities {
    pub fn new(non_stress: f32, stress: f32, neutral: f32) -> Self {
        Self { non_stress, stress, neutral }
    }

    /// Build from a raw output slice. Returns `None` unless it holds exactly three scores.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match *values {
            [non_stress, stress, neutral] => Some(Self::new(non_stress, stress, neutral)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StressLabel {
    #[serde(rename = "Stress")]
    Stress,
    #[serde(rename = "Non-Stress")]
    NonStress,
    #[serde(rename = "Neutral")]
    Neutral,
}

impl StressLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StressLabel::Stress => "Stress",
            StressLabel::NonStress => "Non-Stress",
            StressLabel::Neutral => "Neutral",
        }
    }
}

impl fmt::Display for StressLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for a single face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub label: StressLabel,
    pub confidence: f32,
    pub raw_predictions: ClassProbabilities,
}

/// Result of classifying one encoded image.
///
/// `Faces(vec![])` means the image decoded but no face was found; an image that
/// could not be decoded is always `DecodeFailure`.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionOutcome {
    Faces(Vec<FaceResult>),
    DecodeFailure { reason: String },
}

impl PredictionOutcome {
    pub fn faces(&self) -> Option<&[FaceResult]> {
        match self {
            PredictionOutcome::Faces(faces) => Some(faces),
            PredictionOutcome::DecodeFailure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Vec<FaceResult>, crate::StressError> {
        match self {
            PredictionOutcome::Faces(faces) => Ok(faces),
            PredictionOutcome::DecodeFailure { reason } => {
                Err(crate::StressError::InvalidImage(reason))
            }
        }
    }
}

/// JSON response envelope returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    Ok { prediction: Vec<FaceResult> },
    Error { message: String },
}

impl Envelope {
    pub fn error(message: impl fmt::Display) -> Self {
        Envelope::Error { message: message.to_string() }
    }

    pub fn to_json(&self) -> String {
        // Non-finite floats serialize as null, so this never fails in practice.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","message":"failed to serialize response"}"#.to_string()
        })
    }
}

impl From<PredictionOutcome> for Envelope {
    fn from(outcome: PredictionOutcome) -> Self {
        match outcome {
            PredictionOutcome::Faces(prediction) => Envelope::Ok { prediction },
            PredictionOutcome::DecodeFailure { reason } => {
                Envelope::Error { message: format!("invalid image: {reason}") }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_result_json_keys() {
        let result = FaceResult {
            label: StressLabel::NonStress,
            confidence: 0.75,
            raw_predictions: ClassProbabilities::new(0.75, 0.2, 0.05),
        };
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["label"], "Non-Stress");
        assert_eq!(value["confidence"], 0.75);
        let raw = value["raw_predictions"].as_object().unwrap();
        let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 3);
        assert!(raw.contains_key("Non-Stress"));
        assert!(raw.contains_key("Stress"));
        assert!(raw.contains_key("Neutral"));
        assert_eq!(raw["Non-Stress"], 0.75);
    }

    #[test]
    fn test_envelope_ok_shape() {
        let env = Envelope::Ok { prediction: vec![] };
        let value: serde_json::Value = serde_json::from_str(&env.to_json()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["prediction"], serde_json::json!([]));
    }

    #[test]
    fn test_envelope_from_decode_failure() {
        let env = Envelope::from(PredictionOutcome::DecodeFailure { reason: "truncated".into() });
        let value: serde_json::Value = serde_json::from_str(&env.to_json()).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "invalid image: truncated");
    }

    #[test]
    fn test_probabilities_from_slice() {
        assert_eq!(
            ClassProbabilities::from_slice(&[0.1, 0.2, 0.7]),
            Some(ClassProbabilities::new(0.1, 0.2, 0.7))
        );
        assert!(ClassProbabilities::from_slice(&[0.1, 0.9]).is_none());
        assert!(ClassProbabilities::from_slice(&[0.1, 0.2, 0.3, 0.4]).is_none());
    }

    #[test]
    fn test_region_clamp() {
        let r = FaceRegion::new(90, 90, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(FaceRegion::new(90, 90, 10, 10)));
        assert_eq!(FaceRegion::new(120, 0, 10, 10).clamp_to(100, 100), None);
        assert_eq!(FaceRegion::new(0, 0, 0, 10).clamp_to(100, 100), None);
    }
}
