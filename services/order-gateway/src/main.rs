//! Order gateway service
//!
//! Paper mode routes orders to the fill simulator; live mode expects a
//! broker adapter, which ships out of tree.

use anyhow::{Context, Result, bail};
use bus::{Publisher, TransportFactory};
use clap::Parser;
use common::constants::topics;
use common::{Clock, Config, HeaderFactory};
use engine::gateway::{GatewayMode, OrderGateway};
use sim::{FillConfig, FillModel, FillSimulator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry::{MetricsCollector, MetricsPublisher, recorder::MetricsHub};
use tracing::info;

const SERVICE_NAME: &str = "order-gateway";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Tickforge order gateway")]
struct Args {
    #[arg(short, long)]
    config: Option<String>,
}

fn fill_model(name: &str) -> FillModel {
    match name {
        "immediate" => FillModel::Immediate,
        "market_impact" => FillModel::MarketImpact,
        "latency_aware" => FillModel::LatencyAware,
        "partial_fills" => FillModel::PartialFills,
        _ => FillModel::RealisticSlippage,
    }
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

    if !config.get_bool("trading.paper_mode", true) {
        bail!("live mode requires a broker adapter; this build ships paper mode only");
    }

    info!(service = SERVICE_NAME, "starting in paper mode");
    let clock = Clock::calibrate();
    let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
    let hub = MetricsHub::new(Arc::clone(&clock));
    let factory = TransportFactory::new();

    let signals = factory
        .puller(&config.signals_endpoint())
        .context("connecting signals puller")?;
    let market_data = factory
        .subscriber(&config.market_data_endpoint(), &[topics::MARKET_DATA])
        .context("connecting market data subscriber")?;
    let executions_pub: Arc<dyn Publisher> = Arc::from(
        factory
            .publisher(&config.executions_endpoint())
            .context("binding executions endpoint")?,
    );

    let simulator = FillSimulator::new(
        FillConfig {
            model: fill_model(&config.get_str("simulator.model", "realistic_slippage")),
            slippage_factor: config.get_f64("simulator.slippage_factor", 0.0005),
            min_latency_ms: config.get_u64("simulator.min_latency_ms", 1),
            max_latency_ms: config.get_u64("simulator.max_latency_ms", 10),
            partial_fill_probability: config.get_f64("simulator.partial_fill_probability", 0.3),
            commission_per_share: config.get_f64("simulator.commission_per_share", 0.005),
            minimum_commission: config.get_f64("simulator.minimum_commission", 1.0),
            respect_market_hours: config.get_bool("simulator.respect_market_hours", false),
            seed: config.get_u64("simulator.seed", 0),
            ..FillConfig::default()
        },
        Arc::clone(&clock),
    );
    let sim_stats = simulator.stats_handle();

    let mut gateway = OrderGateway::new(
        GatewayMode::Paper,
        signals,
        market_data,
        executions_pub,
        Box::new(simulator),
        Arc::clone(&headers),
        Arc::clone(&hub),
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

    gateway.start();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Release))
        .context("installing signal handler")?;
    while running.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    gateway.stop();
    metrics_publisher.stop();
    let stats = *sim_stats.lock();
    info!(
        orders = gateway.orders_processed(),
        filled = gateway.orders_filled(),
        commission = stats.total_commission,
        "order gateway stopped"
    );
    Ok(())
}
