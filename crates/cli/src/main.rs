//! pitwall - racing simulator telemetry companion

mod orchestrator;
mod radar;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use pitwall_config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pitwall")]
#[command(about = "Real-time InSim/OutSim telemetry companion")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handle = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handle.store(true, Ordering::SeqCst);
    })
    .context("failed to install interrupt handler")?;

    orchestrator::run(config, cli.config, stop)
}
