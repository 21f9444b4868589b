use crate::engine::EngineHandle;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use stressguard_core::{DecisionPolicy, ModelPaths};
use zbus::interface;

/// D-Bus interface for the StressGuard classification daemon.
///
/// Bus name: org.stressguard.Classifier1
/// Object path: /org/stressguard/Classifier1
pub struct ClassifierService {
    engine: EngineHandle,
    models: ModelPaths,
    policy: DecisionPolicy,
    started_at: DateTime<Utc>,
    requests_served: AtomicU64,
}

impl ClassifierService {
    pub fn new(engine: EngineHandle, models: ModelPaths, policy: DecisionPolicy) -> Self {
        Self {
            engine,
            models,
            policy,
            started_at: Utc::now(),
            requests_served: AtomicU64::new(0),
        }
    }
}

#[interface(name = "org.stressguard.Classifier1")]
impl ClassifierService {
    /// Classify every face in a base64 image (plain or data URL).
    ///
    /// Always answers with the JSON envelope; failures are reported as
    /// `{"status": "error", ...}` rather than D-Bus errors.
    async fn predict_image(&self, image: String) -> String {
        tracing::info!(len = image.len(), "predict requested");
        let envelope = self.engine.predict_envelope(image).await;
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        envelope.to_json()
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "classifier_model": self.models.classifier.display().to_string(),
            "cascade_model": self.models.cascade.display().to_string(),
            "stress_threshold": self.policy.stress_threshold,
            "non_stress_threshold": self.policy.non_stress_threshold,
            "started_at": self.started_at.to_rfc3339(),
            "requests_served": self.requests_served.load(Ordering::Relaxed),
        })
        .to_string())
    }
}
