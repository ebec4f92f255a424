//! flowclass - Main Entry Point
//!
//! # Usage
//!
//! ```bash
//! flowclass --replay capture.jsonl --model model.json
//! flowclass --pcap capture.pcap --model model.json --window 5 --json
//! RUST_LOG=debug flowclass --replay capture.jsonl --config flowclass.json
//! ```

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use flowclass_core::{
    ClassifierConfig, FlowError, JsonLinesSink, LinearModel, LogSink, PacketSource, Pipeline, ReplaySource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "flowclass")]
#[command(version)]
#[command(about = "Classify network flows from windowed packet statistics", long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["replay", "pcap"])))]
struct Args {
    /// JSON-lines packet records to replay
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Offline capture to replay (needs the `pcap` feature)
    #[arg(long, value_name = "FILE")]
    pcap: Option<PathBuf>,

    /// Configuration file
    #[arg(long, short, env = "FLOWCLASS_CONFIG")]
    config: Option<String>,

    /// Linear model weights (overrides model_path)
    #[arg(long, short)]
    model: Option<PathBuf>,

    /// Window duration in seconds
    #[arg(long, short)]
    window: Option<f64>,

    /// Inference timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Z-score features across each window's flows
    #[arg(long)]
    standardize: bool,

    /// Keep the two directions of a conversation as separate flows
    #[arg(long)]
    unidirectional: bool,

    /// Write one JSON report per window to stdout
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> anyhow::Result<ClassifierConfig> {
    let mut config = match &args.config {
        Some(path) => match ClassifierConfig::load(path) {
            Ok(config) => config,
            Err(FlowError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path, "Config not found, using defaults");
                ClassifierConfig::default()
            }
            Err(e) => return Err(e).with_context(|| format!("loading config {}", path)),
        },
        None => ClassifierConfig::default(),
    };

    if let Some(window) = args.window {
        config.window_secs = window;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.inference_timeout_ms = timeout_ms;
    }
    if args.standardize {
        config.standardize = true;
    }
    if args.unidirectional {
        config.bidirectional = false;
    }
    if let Some(model) = &args.model {
        config.model_path = Some(model.display().to_string());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn open_source(args: &Args, config: &ClassifierConfig) -> anyhow::Result<Box<dyn PacketSource>> {
    if let Some(path) = &args.replay {
        let source = ReplaySource::open(path, config.bidirectional)
            .await
            .with_context(|| format!("opening replay file {}", path.display()))?;
        return Ok(Box::new(source));
    }

    if let Some(path) = &args.pcap {
        return open_pcap(path, config);
    }

    bail!("no packet source given")
}

#[cfg(feature = "pcap")]
fn open_pcap(path: &Path, config: &ClassifierConfig) -> anyhow::Result<Box<dyn PacketSource>> {
    let source = flowclass_core::PcapSource::open(path, config.bidirectional)
        .with_context(|| format!("opening capture {}", path.display()))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "pcap"))]
fn open_pcap(_path: &Path, _config: &ClassifierConfig) -> anyhow::Result<Box<dyn PacketSource>> {
    bail!("flowclass was built without pcap support; rebuild with --features pcap")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("flowclass v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = load_config(&args)?;

    let Some(model_path) = config.model_path.clone() else {
        bail!("a model is required: pass --model or set model_path in the config");
    };
    let model = LinearModel::load(&model_path).with_context(|| format!("loading model {}", model_path))?;

    let mut source = open_source(&args, &config).await?;

    let mut pipeline = Pipeline::new(config, Arc::new(model))?.with_sink(Arc::new(LogSink));
    if args.json {
        pipeline = pipeline.with_sink(Arc::new(JsonLinesSink::new(std::io::stdout())));
    }

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = pipeline.run_until(source.as_mut(), shutdown).await?;

    tracing::info!(
        stats = %serde_json::to_string(&outcome.stats)?,
        active_flows = outcome.tracker.len(),
        "final statistics"
    );
    Ok(())
}
