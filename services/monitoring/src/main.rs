//! Metrics aggregation service
//!
//! Subscribes to every service's metrics endpoint, tracks liveness and
//! prints a JSON snapshot of the fleet on a fixed cadence. The control
//! plane reads the same snapshot export.

use anyhow::{Context, Result};
use bus::TransportFactory;
use clap::Parser;
use common::constants::{defaults, topics};
use common::{Clock, Config};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry::MetricsAggregator;
use tracing::info;

const SERVICE_NAME: &str = "monitoring";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Tickforge metrics aggregator")]
struct Args {
    #[arg(short, long)]
    config: Option<String>,

    /// Seconds between printed fleet snapshots (0 disables printing).
    #[arg(long, default_value_t = 10)]
    snapshot_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path).context("loading config")?,
        None => Config::empty(),
    };

    info!(service = SERVICE_NAME, "starting");
    let clock = Clock::calibrate();
    let factory = TransportFactory::new();

    let endpoints = match config.get("metrics.aggregator.endpoints") {
        Some(csv) => csv.split(',').map(|s| s.trim().to_string()).collect(),
        None => defaults::metrics_endpoints(),
    };
    let mut subscribers = Vec::new();
    for endpoint in &endpoints {
        let subscriber = factory
            .subscriber(endpoint, &[topics::METRICS])
            .with_context(|| format!("connecting to {endpoint}"))?;
        info!(endpoint = %endpoint, "watching metrics endpoint");
        subscribers.push(subscriber);
    }

    let mut aggregator = MetricsAggregator::new(Arc::clone(&clock), subscribers);
    aggregator.start();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Release))
        .context("installing signal handler")?;

    let mut last_snapshot = std::time::Instant::now();
    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
        if args.snapshot_secs > 0
            && last_snapshot.elapsed() >= Duration::from_secs(args.snapshot_secs)
        {
            println!("{}", aggregator.snapshot_json());
            last_snapshot = std::time::Instant::now();
        }
    }

    info!("shutting down");
    aggregator.stop();
    Ok(())
}
