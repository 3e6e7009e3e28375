//! Position & risk service

use anyhow::{Context, Result};
use bus::{Publisher, TransportFactory};
use clap::Parser;
use common::constants::topics;
use common::{Clock, Config, HeaderFactory};
use engine::risk::RiskLimits;
use engine::service::PositionRiskService;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry::{MetricsCollector, MetricsPublisher, recorder::MetricsHub};
use tracing::info;

const SERVICE_NAME: &str = "position-risk";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Tickforge position and risk service")]
struct Args {
    #[arg(short, long)]
    config: Option<String>,
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
    let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
    let hub = MetricsHub::new(Arc::clone(&clock));
    let factory = TransportFactory::new();

    let executions = factory
        .subscriber(&config.executions_endpoint(), &[topics::EXECUTIONS])
        .context("connecting executions subscriber")?;
    let market_data = factory
        .subscriber(&config.market_data_endpoint(), &[topics::MARKET_DATA])
        .context("connecting market data subscriber")?;
    let positions_pub: Arc<dyn Publisher> = Arc::from(
        factory
            .publisher(&config.positions_endpoint())
            .context("binding positions endpoint")?,
    );

    let limits = RiskLimits {
        max_position_value: config.get_f64("risk.max_position_value", 100_000.0),
        max_daily_loss: config.get_f64("risk.max_daily_loss", 5_000.0),
        position_limit_per_symbol: config.get_u64("risk.position_limit_per_symbol", 10_000) as i64,
    };

    let mut service = PositionRiskService::new(
        executions,
        market_data,
        positions_pub,
        Arc::clone(&headers),
        Arc::clone(&hub),
        limits,
    );

    let mut collector = MetricsCollector::new(Arc::clone(&hub));
    collector.start();
    let collector = Arc::new(collector);
    let metrics_pub: Arc<dyn Publisher> = Arc::from(
        factory
            .publisher(&config.metrics_endpoint(SERVICE_NAME))
            .context("binding metrics endpoint")?,
    );
    let mut metrics_publisher = MetricsPublisher::new(
        SERVICE_NAME,
        Arc::clone(&collector),
        metrics_pub,
        Arc::clone(&headers),
    );
    metrics_publisher.start();

    service.start();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Release))
        .context("installing signal handler")?;
    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    service.stop();
    metrics_publisher.stop();
    let (realized, unrealized) = service.total_pnl();
    info!(realized, unrealized, "position/risk service stopped");
    Ok(())
}
