//! Screen Color - main entry point
//!
//! Captures the main display and serves color events over HTTP.

use clap::Parser;
use screen_color::server::{self, AppState};
use screen_color::{ColorStream, Config, DisplayCapture};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stream the screen's representative colors as server-sent events
#[derive(Debug, Parser)]
#[command(name = "screen-color", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.bind_address)
    #[arg(long)]
    bind: Option<String>,

    /// Pixel sampling stride (overrides sampling.stride)
    #[arg(long)]
    stride: Option<u32>,

    /// Log level (overrides general.log_level; RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path.clone()),
        None => Config::load(),
    };
    apply_overrides(&mut config, &cli);

    // Initialize logging
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("Starting Screen Color");
    info!(
        "Configuration from {:?}",
        cli.config.clone().unwrap_or_else(Config::default_config_path)
    );
    config.validate()?;

    let capture = match DisplayCapture::main_display() {
        Ok(capture) => capture,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };
    info!("Capturing display {}", capture.display_id());

    let colors = ColorStream::from_config(Arc::new(capture), &config)?;
    info!(
        "Algorithms: {:?}, primary: {}, stride: {}",
        colors.finder().registry().names().collect::<Vec<_>>(),
        colors.finder().primary(),
        config.sampling.stride
    );

    let state = AppState::new(colors, &config.server);
    server::serve(state, &config.server.bind_address, shutdown_signal()).await?;

    info!("Shut down");
    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(bind) = &cli.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(stride) = cli.stride {
        config.sampling.stride = stride;
    }
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
