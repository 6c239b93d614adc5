//! Vitrine Viewer - Main entry point
//!
//! Loads the showroom model, decorates the live scene and drives the frame
//! loop until the frame limit or Ctrl-C, then tears everything down.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vitrine_core::ResourceTracker;
use vitrine_loader::{
    AssetSource, DecoderConfig, FileSource, GltfAssetLoader, GltfDecoder, HttpSource, LoaderService,
    ModelCache,
};

use vitrine_viewer::config;
use vitrine_viewer::{Config, HeadlessRenderer, LogOverlay, SceneManager};

#[derive(Parser, Debug)]
#[command(name = "vitrine")]
#[command(about = "Showroom model viewer with cached, retried model loading")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "vitrine.toml")]
    config: PathBuf,

    /// Model path, overriding the configuration
    #[arg(short, long)]
    model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Frames to render before exiting (0 runs until Ctrl-C)
    #[arg(short, long)]
    frames: Option<u64>,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Vitrine v{}", env!("CARGO_PKG_VERSION"));

    if args.write_default_config {
        return config::save_default_config(&args.config);
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(model) = args.model {
        config.viewer.model_path = model;
    }
    if let Some(frames) = args.frames {
        config.viewer.frames = frames;
    }

    info!(
        model = %config.viewer.model_path,
        root = %config.viewer.asset_root,
        profile = ?config.viewer.profile,
        fps = config.viewer.fps(),
        "Configuration loaded"
    );

    let root = config.viewer.asset_root.clone();
    if root.starts_with("http://") || root.starts_with("https://") {
        let timeout = Duration::from_secs(config.loader.http_timeout_secs);
        run_viewer(config, HttpSource::new(root, timeout)?).await
    } else {
        run_viewer(config, FileSource::new(root)).await
    }
}

async fn run_viewer<S>(config: Config, source: S) -> Result<()>
where
    S: AssetSource + Clone + 'static,
{
    let tracker = ResourceTracker::new();
    let retry = config.loader.retry_policy();
    let decoder = GltfDecoder::new(DecoderConfig {
        decoder_path: config.loader.decoder_path.clone(),
    });
    let service = LoaderService::create(move || {
        ModelCache::new(
            GltfAssetLoader::new(source.clone(), decoder.clone()),
            retry.clone(),
            tracker.clone(),
        )
    });

    let (width, height) = (config.viewer.width, config.viewer.height);
    let frames = config.viewer.frames;
    let renderer = HeadlessRenderer::new(width, height, 1.0);
    let mut manager = SceneManager::new(config, service, renderer, 1.0);

    // Teardown runs whether or not setup succeeded
    let setup = manager.setup(Box::new(LogOverlay::default())).await;
    if setup.is_ok() {
        let drawn = manager
            .run_until(frames, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await;
        info!(frames = drawn, "Frame loop finished");
    }

    manager.teardown().await;
    setup
}
