mod config;
mod supervisor;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// NVRLite - lightweight multi-camera RTSP recorder
///
/// Ingests RTSP H.264/H.265 streams, keeps a rolling pre-roll buffer per
/// camera, and records pre-roll + live + post-roll MP4 files on HTTP command.
#[derive(Parser)]
#[command(name = "nvrlite", version, about = "Lightweight multi-camera RTSP recorder")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    gstreamer::init().context("failed to initialize GStreamer")?;

    let config = config::AppConfig::load(&cli.config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(supervisor::run(config))
}
