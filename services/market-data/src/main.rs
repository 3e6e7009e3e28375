//! Market data service
//!
//! Binds the market-data endpoint and fans ticks from the configured
//! source into the platform. Ships with the mock random-walk source;
//! vendor feed adapters plug in through the same `FeedSource` seam.

use anyhow::{Context, Result};
use bus::{Publisher, TransportFactory};
use clap::Parser;
use common::{Clock, Config, HeaderFactory};
use feeds::{MarketDataHandler, MockFeed};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use telemetry::{MetricsCollector, MetricsPublisher, recorder::MetricsHub};
use tracing::info;

const SERVICE_NAME: &str = "market-data";

#[derive(Parser, Debug)]
#[command(name = SERVICE_NAME, about = "Tickforge market data service")]
struct Args {
    /// Path to the key=value config file.
    #[arg(short, long)]
    config: Option<String>,

    /// Random seed for the mock source.
    #[arg(long, default_value_t = 0)]
    seed: u64,
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

    let md_endpoint = config.market_data_endpoint();
    let publisher: Arc<dyn Publisher> = Arc::from(
        factory
            .publisher(&md_endpoint)
            .context("binding market data endpoint")?,
    );
    info!(endpoint = %md_endpoint, "market data publisher bound");

    let symbols_raw = config.get_str("mock_data.symbols", "AAPL:190,MSFT:410,SPY:512");
    let symbols: Vec<(&str, f64)> = symbols_raw
        .split(',')
        .filter_map(|pair| {
            let (name, price) = pair.split_once(':')?;
            Some((name.trim(), price.trim().parse().ok()?))
        })
        .collect();
    let frequency_hz = config.get_u32("mock_data.frequency_hz", 10);
    let source = MockFeed::new(&symbols, frequency_hz, args.seed);

    let mut handler = MarketDataHandler::new(
        Box::new(source),
        publisher,
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

    handler.start();

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::Release);
    })
    .context("installing signal handler")?;

    while running.load(Ordering::Acquire) && handler.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    handler.stop();
    metrics_publisher.stop();
    info!(
        processed = handler.processed(),
        dropped = handler.drops(),
        "market data service stopped"
    );
    Ok(())
}
