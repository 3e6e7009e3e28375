//! Backtesting harness
//!
//! Replays a historical CSV through the full strategy/gateway/risk
//! pipeline and prints the report as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use engine::momentum::MomentumConfig;
use engine::risk::RiskLimits;
use sim::{BacktestConfig, FillConfig, FillModel, run_backtest};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "backtesting", about = "Tickforge backtest runner")]
struct Args {
    /// Historical data CSV
    /// (`timestamp_ms,symbol,open,high,low,close,volume,bid,ask`).
    #[arg(short, long)]
    data: String,

    #[arg(short, long)]
    config: Option<String>,

    /// Replay speed multiplier; 0 fast-forwards.
    #[arg(long, default_value_t = 0.0)]
    speed: f64,

    /// Fill model: immediate | realistic_slippage | market_impact |
    /// latency_aware | partial_fills.
    #[arg(long, default_value = "realistic_slippage")]
    fill_model: String,

    /// Simulator RNG seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Inclusive replay window in data milliseconds.
    #[arg(long)]
    start_ts_ms: Option<u64>,
    #[arg(long)]
    end_ts_ms: Option<u64>,
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

    let backtest = BacktestConfig {
        csv_path: args.data.clone().into(),
        speed: args.speed,
        start_ts_ms: args.start_ts_ms,
        end_ts_ms: args.end_ts_ms,
        fill: FillConfig {
            model: fill_model(&args.fill_model),
            seed: args.seed,
            min_latency_ms: config.get_u64("simulator.min_latency_ms", 1),
            max_latency_ms: config.get_u64("simulator.max_latency_ms", 10),
            commission_per_share: config.get_f64("simulator.commission_per_share", 0.005),
            minimum_commission: config.get_f64("simulator.minimum_commission", 1.0),
            ..FillConfig::default()
        },
        momentum: MomentumConfig {
            threshold: config.get_f64("strategy.momentum.threshold", 0.001),
            min_signal_interval_ms: config
                .get_u64("strategy.momentum.min_signal_interval_ms", 1000),
            order_quantity: config.get_u32("strategy.momentum.order_quantity", 100),
        },
        risk: RiskLimits {
            max_position_value: config.get_f64("risk.max_position_value", 100_000.0),
            max_daily_loss: config.get_f64("risk.max_daily_loss", 5_000.0),
            position_limit_per_symbol: config.get_u64("risk.position_limit_per_symbol", 10_000)
                as i64,
        },
    };

    info!(data = %args.data, speed = args.speed, "running backtest");
    let report = run_backtest(&backtest).context("backtest failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
