//! Strategy engine service

use anyhow::{Context, Result};
use bus::{Publisher, Pusher, TransportFactory};
use clap::Parser;
use common::constants::topics;
use common::{Clock, Config, HeaderFactory};
use engine::book_pressure::{BookPressureConfig, BookPressureStrategy};
use engine::momentum::{MomentumConfig, MomentumStrategy};
use engine::pairs::{PairsConfig, PairsStrategy};
use engine::quoting::{QuotingConfig, QuotingStrategy};
use engine::strategy::SignalSink;
use engine::StrategyEngine;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry::{MetricsCollector, MetricsPublisher, recorder::MetricsHub};
use tracing::info;

const SERVICE_NAME: &str = "strategy-engine";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Tickforge strategy engine")]
struct Args {
    #[arg(short, long)]
    config: Option<String>,

    /// Also register the quoting strategy.
    #[arg(long)]
    quoting: bool,

    /// Also register the book-pressure strategy.
    #[arg(long)]
    book_pressure: bool,
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

    let market_data = factory
        .subscriber(
            &config.market_data_endpoint(),
            &[topics::MARKET_DATA, topics::ORDER_BOOK],
        )
        .context("connecting market data subscriber")?;
    let executions = factory
        .subscriber(&config.executions_endpoint(), &[topics::EXECUTIONS])
        .context("connecting executions subscriber")?;
    let control = factory
        .subscriber(&config.control_endpoint(), &[topics::CONTROL])
        .context("connecting control subscriber")?;
    let signal_pusher: Arc<dyn Pusher> = Arc::from(
        factory
            .pusher(&config.signals_endpoint())
            .context("binding signals endpoint")?,
    );

    let sink = SignalSink::new(signal_pusher, Arc::clone(&headers));
    sink.set_enabled(config.get_bool("trading.enabled", true));

    let mut engine = StrategyEngine::new(
        SERVICE_NAME,
        market_data,
        executions,
        Arc::clone(&sink),
        Arc::clone(&hub),
    )
    .with_control(control);

    engine.add_strategy(Box::new(MomentumStrategy::new(
        1001,
        MomentumConfig {
            threshold: config.get_f64("strategy.momentum.threshold", 0.001),
            min_signal_interval_ms: config
                .get_u64("strategy.momentum.min_signal_interval_ms", 1000),
            order_quantity: config.get_u32("strategy.momentum.order_quantity", 100),
        },
    )));
    if args.quoting || config.get_bool("strategy.quoting.enabled", false) {
        engine.add_strategy(Box::new(QuotingStrategy::new(
            2001,
            QuotingConfig {
                spread_bps: config.get_f64("strategy.quoting.spread_bps", 10.0),
                quote_size: config.get_u32("strategy.quoting.quote_size", 100),
                max_inventory: config.get_u64("strategy.quoting.max_inventory", 1000) as i64,
                refresh_interval_ms: config.get_u64("strategy.quoting.refresh_interval_ms", 100),
            },
        )));
    }
    if args.book_pressure || config.get_bool("strategy.book_pressure.enabled", false) {
        engine.add_strategy(Box::new(BookPressureStrategy::new(
            3001,
            BookPressureConfig::default(),
        )));
    }
    if config.get_bool("strategy.pairs.enabled", false) {
        let symbol_a = config.get_str("strategy.pairs.symbol_a", "XLE");
        let symbol_b = config.get_str("strategy.pairs.symbol_b", "XOM");
        engine.add_strategy(Box::new(PairsStrategy::new(
            4001,
            PairsConfig {
                zscore_threshold: config.get_f64("strategy.pairs.zscore_threshold", 2.0),
                order_quantity: config.get_u32("strategy.pairs.order_quantity", 100),
                ..PairsConfig::new(symbol_a.as_str(), symbol_b.as_str())
            },
        )));
    }

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

    engine.start();

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Release))
        .context("installing signal handler")?;
    while running.load(Ordering::Acquire) && engine.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    engine.stop();
    metrics_publisher.stop();
    Ok(())
}
