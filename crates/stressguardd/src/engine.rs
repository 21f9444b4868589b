use std::time::{Duration, Instant};
use stressguard_core::{Envelope, PredictionOutcome, StressClassifier, StressError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] StressError),
    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Predict {
        id: Uuid,
        payload: String,
        reply: oneshot::Sender<Result<PredictionOutcome, StressError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Classify a base64 image payload on the engine thread.
    ///
    /// Waiting stops after the configured timeout; the engine still finishes
    /// the in-flight request before taking the next one.
    pub async fn predict(&self, payload: String) -> Result<PredictionOutcome, EngineError> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = async {
            self.tx
                .send(EngineRequest::Predict {
                    id,
                    payload,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        match tokio::time::timeout(self.timeout, request).await {
            Ok(reply) => Ok(reply??),
            Err(_) => {
                tracing::warn!(request = %id, timeout_ms = self.timeout.as_millis() as u64, "prediction timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }

    /// Like [`predict`](Self::predict), folded into the response envelope.
    pub async fn predict_envelope(&self, payload: String) -> Envelope {
        match self.predict(payload).await {
            Ok(outcome) => Envelope::from(outcome),
            Err(e) => Envelope::error(e),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The pipeline is moved onto the thread and serves one request at a time.
pub fn spawn_engine(pipeline: StressClassifier, timeout: Duration) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("stressguard-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Predict { id, payload, reply } => {
                        if reply.is_closed() {
                            tracing::debug!(request = %id, "caller gave up; skipping queued request");
                            continue;
                        }
                        let result = run_predict(&pipeline, id, &payload);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}

fn run_predict(
    pipeline: &StressClassifier,
    id: Uuid,
    payload: &str,
) -> Result<PredictionOutcome, StressError> {
    let started = Instant::now();
    let result = pipeline.predict_base64(payload);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(PredictionOutcome::Faces(faces)) => {
            tracing::info!(request = %id, faces = faces.len(), elapsed_ms, "prediction complete");
        }
        Ok(PredictionOutcome::DecodeFailure { reason }) => {
            tracing::info!(request = %id, %reason, elapsed_ms, "prediction rejected undecodable image");
        }
        Err(e) => {
            tracing::warn!(request = %id, error = %e, elapsed_ms, "prediction failed");
        }
    }
    result
}
