//! Binary entry point: loads configuration, starts one supervisor per
//! configured source, and runs until interrupted.

use anyhow::{Context, Result};
use aviary_ingest::config::{ConfigOverrides, IngestConfig};
use aviary_ingest::manager::StreamManager;
use aviary_ingest::supervisor::OutputEvent;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const OUTPUT_SINK_CAPACITY: usize = 256;
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "aviary-ingest")]
#[command(about = "Multi-source RTSP audio ingestion and sound-level analysis backbone")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "aviary-ingest.toml")]
    config: PathBuf,

    /// Decoder binary override (e.g. an absolute path to ffmpeg)
    #[arg(long)]
    decoder_binary: Option<String>,

    /// Sample rate override, in Hz
    #[arg(long)]
    sample_rate: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aviary_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let args = Args::parse();
    info!(config = ?args.config, "starting aviary-ingest");

    let overrides = ConfigOverrides {
        decoder_binary: args.decoder_binary,
        sample_rate: args.sample_rate,
        urls: None,
    };
    let config = IngestConfig::load(&args.config, overrides)
        .await
        .context("failed to load configuration")?;

    let manager = Arc::new(StreamManager::new(&config).context("failed to build stream manager")?);
    let (sink, mut output_rx) = mpsc::channel::<OutputEvent>(OUTPUT_SINK_CAPACITY);

    for url in &config.urls {
        let transport = config.transport_for(url);
        if let Err(e) = manager.start_stream(url, transport, sink.clone()).await {
            error!(url, error = %e, "failed to start configured stream");
        }
    }
    drop(sink);

    let consumer = tokio::spawn(async move {
        while let Some(event) = output_rx.recv().await {
            match event {
                OutputEvent::Chunk(chunk) => {
                    tracing::debug!(
                        source = %chunk.source,
                        bytes = chunk.bytes().len(),
                        dbfs = chunk.audio_level.dbfs,
                        "analysis chunk ready"
                    );
                }
                OutputEvent::SoundLevel(report) => {
                    tracing::info!(
                        source = %report.source,
                        duration = report.duration,
                        bands = report.bands.len(),
                        "sound level report"
                    );
                }
            }
        }
    });

    let desired_urls = Arc::new(RwLock::new(config.urls.clone()));
    manager.start_monitoring(RECONCILE_INTERVAL, desired_urls);

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining streams");
    manager.shutdown().await;
    consumer.abort();

    Ok(())
}
