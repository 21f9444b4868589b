use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stressguard_core::{Envelope, ModelPaths, PipelineConfig, StressClassifier};

#[derive(Parser)]
#[command(name = "stressguard", about = "StressGuard facial stress classification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an image file in-process, without the daemon
    Predict {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
        /// Directory with stress_model.onnx and the Haar cascade
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Pipeline tuning TOML
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Pretty-print the JSON envelope
        #[arg(long)]
        pretty: bool,
    },
    /// Send an image file to the running daemon
    Remote {
        image: PathBuf,
        /// Use the system bus instead of the session bus (default: $STRESSGUARD_BUS)
        #[arg(long)]
        system: bool,
    },
    /// Show daemon status
    Status {
        /// Use the system bus instead of the session bus (default: $STRESSGUARD_BUS)
        #[arg(long)]
        system: bool,
    },
}

#[zbus::proxy(
    interface = "org.stressguard.Classifier1",
    default_service = "org.stressguard.Classifier1",
    default_path = "/org/stressguard/Classifier1"
)]
trait ClassifierService {
    async fn predict_image(&self, image: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Predict {
            image,
            model_dir,
            config,
            pretty,
        } => {
            let envelope = predict_local(&image, model_dir, config)?;
            let json = if pretty {
                serde_json::to_string_pretty(&envelope)?
            } else {
                envelope.to_json()
            };
            println!("{json}");
        }
        Commands::Remote { image, system } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
            let conn = connect(system).await?;
            let proxy = ClassifierServiceProxy::new(&conn).await?;
            println!("{}", proxy.predict_image(&payload).await?);
        }
        Commands::Status { system } => {
            let conn = connect(system).await?;
            let proxy = ClassifierServiceProxy::new(&conn).await?;
            match proxy.status().await {
                Ok(status) => println!("{status}"),
                Err(e) => println!("stressguardd: not connected ({e})"),
            }
        }
    }

    Ok(())
}

fn predict_local(image: &Path, model_dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<Envelope> {
    let model_dir = model_dir
        .or_else(|| std::env::var("STRESSGUARD_MODEL_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(stressguard_core::default_model_dir);
    let config = match config.or_else(|| std::env::var("STRESSGUARD_CONFIG").ok().map(PathBuf::from)) {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };

    let bytes = std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    tracing::debug!(path = %image.display(), bytes = bytes.len(), model_dir = %model_dir.display(), "local prediction");
    let pipeline = StressClassifier::load(&ModelPaths::in_dir(&model_dir), &config)
        .with_context(|| format!("failed to load models from {}", model_dir.display()))?;

    Ok(match pipeline.predict_encoded(&bytes) {
        Ok(outcome) => Envelope::from(outcome),
        Err(e) => Envelope::error(e),
    })
}

/// `--system` wins; otherwise `STRESSGUARD_BUS=system` selects the system bus,
/// as it does for the daemon.
fn system_bus_requested(flag: bool, env_bus: Option<&str>) -> bool {
    flag || env_bus == Some("system")
}

async fn connect(system: bool) -> Result<zbus::Connection> {
    let env_bus = std::env::var("STRESSGUARD_BUS").ok();
    let builder = if system_bus_requested(system, env_bus.as_deref()) {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    Ok(builder.method_timeout(Duration::from_secs(60)).build().await?)
}
