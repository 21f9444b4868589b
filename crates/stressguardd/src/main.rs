use anyhow::{Context, Result};
use std::time::Duration;
use stressguard_core::StressClassifier;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};

const BUS_NAME: &str = "org.stressguard.Classifier1";
const OBJECT_PATH: &str = "/org/stressguard/Classifier1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("stressguardd starting");

    let config = Config::from_env();
    let pipeline_config = config.pipeline()?;
    let models = config.model_paths();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        timeout_secs = config.inference_timeout_secs,
        bus = ?config.bus,
        "configuration loaded"
    );

    let pipeline = StressClassifier::load(&models, &pipeline_config)
        .context("failed to load stress classifier")?;
    let engine = engine::spawn_engine(pipeline, Duration::from_secs(config.inference_timeout_secs))?;

    let service = dbus_interface::ClassifierService::new(engine, models, pipeline_config.policy);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME}"))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "stressguardd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("stressguardd shutting down");

    Ok(())
}
