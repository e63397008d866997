use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roboteq_zenoh_runtime::config::{RuntimeConfig, LOOP_HZ, MAX_LOOP_HZ};

/// Per-channel adapter between user units and a motor controller's encoder units
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON file with channel constants (defaults to a dual-channel direct-drive setup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Loop and watchdog check rate
    #[arg(long, default_value_t = LOOP_HZ, value_parser = clap::value_parser!(u64).range(1..=MAX_LOOP_HZ))]
    loop_hz: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading channel config from {}", path.display());
            match RuntimeConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Config error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => RuntimeConfig::default(),
    };

    if let Err(e) = roboteq_zenoh_runtime::runtime::run_with_rate(config, args.loop_hz).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
