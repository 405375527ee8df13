//! Launchkey surface - standalone driver host
//!
//! Keeps a Novation Launchkey MK3 in DAW mode and wires its controls to the
//! built-in console session.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launchkey_surface::config::AppConfig;
use launchkey_surface::monitor;
use launchkey_surface::paths::AppPaths;
use launchkey_surface::ports::MidirPorts;
use launchkey_surface::session::console::{ConsoleInvoker, ConsoleSession};
use launchkey_surface::surface::{ControlSurface, LaunchkeySurface};

/// Launchkey Surface - drive a mixing session from a Novation Launchkey MK3
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the detected location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Monitor raw MIDI traffic instead of running the driver
    #[arg(long)]
    monitor: bool,

    /// With --monitor: attach only to the input matching this index or name fragment
    #[arg(long)]
    port: Option<String>,

    /// List available MIDI ports and the probe result
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Launchkey surface...");

    let paths = AppPaths::detect();
    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());
    info!("Configuration file: {}", config_path.display());

    let config = if config_path.exists() {
        AppConfig::load(&config_path).await?
    } else {
        info!("No config file found, using defaults");
        AppConfig::default()
    };

    if args.list_ports {
        monitor::list_ports_formatted(&config.device.probe)?;
        return Ok(());
    }

    if args.monitor {
        monitor::run_monitor(args.port.as_deref()).await?;
        return Ok(());
    }

    paths.ensure_directories()?;

    run_app(config, &paths, shutdown_signal()).await?;

    info!("Launchkey surface shutdown complete");
    Ok(())
}

async fn run_app(
    config: AppConfig,
    paths: &AppPaths,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let session = ConsoleSession::new(config.session.tracks);
    let invoker = ConsoleInvoker::new();

    let registry = MidirPorts::new()?;
    let mut surface = LaunchkeySurface::new(
        config.device.name.clone(),
        Box::new(registry),
        session.clone(),
        invoker,
        config.device.probe.clone(),
    );

    // Restore state from the previous run. Failures here are cosmetic;
    // the driver probes its way back regardless.
    let state_file = config
        .state_file
        .clone()
        .unwrap_or_else(|| paths.state_file());
    if state_file.exists() {
        match tokio::fs::read_to_string(&state_file).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(doc) => {
                    if let Err(e) = surface.set_state(doc).await {
                        warn!("Ignoring saved state: {}", e);
                    }
                }
                Err(e) => warn!("Ignoring unreadable saved state: {}", e),
            },
            Err(e) => warn!("Failed to read saved state: {}", e),
        }
    }

    surface.start().await?;
    info!("Ready, waiting for a Launchkey MK3 to appear");

    shutdown.await;

    info!("Shutting down...");
    match surface.get_state().await {
        Ok(doc) => {
            if let Err(e) = persist_state(&state_file, &doc).await {
                warn!("Failed to save state: {}", e);
            }
        }
        Err(e) => warn!("Failed to capture state: {}", e),
    }

    surface.stop().await?;
    info!("Session summary: {} parameter writes", session.write_count());

    Ok(())
}

async fn persist_state(path: &Path, doc: &serde_json::Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_vec_pretty(doc)?).await?;
    info!("Saved surface state to {}", path.display());
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
