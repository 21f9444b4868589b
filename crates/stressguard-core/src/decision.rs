//! Thresholded label policy over the three class scores.
//!
//! The rule is ordered, not an arg-max: a confident Stress score wins first,
//! then a confident Non-Stress score, and everything else falls through to
//! Neutral with the neutral score as confidence, however small it is.

use crate::types::{ClassProbabilities, FaceResult, StressLabel};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STRESS_THRESHOLD: f32 = 0.6;
pub const DEFAULT_NON_STRESS_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    /// Stress wins when its score is strictly above this value.
    pub stress_threshold: f32,
    /// Non-Stress wins when its score is strictly above this value (checked after Stress).
    pub non_stress_threshold: f32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            stress_threshold: DEFAULT_STRESS_THRESHOLD,
            non_stress_threshold: DEFAULT_NON_STRESS_THRESHOLD,
        }
    }
}

impl DecisionPolicy {
    pub fn decide(&self, probs: ClassProbabilities) -> FaceResult {
        let (label, confidence) = if probs.stress > self.stress_threshold {
            (StressLabel::Stress, probs.stress)
        } else if probs.non_stress > self.non_stress_threshold {
            (StressLabel::NonStress, probs.non_stress)
        } else {
            (StressLabel::Neutral, probs.neutral)
        };

        FaceResult {
            label,
            confidence,
            raw_predictions: probs,
        }
    }
}

/// Apply the default policy (0.6 / 0.6).
pub fn decide(probs: ClassProbabilities) -> FaceResult {
    DecisionPolicy::default().decide(probs)
}
