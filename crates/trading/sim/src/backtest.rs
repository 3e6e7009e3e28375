//! Backtest composition
//!
//! Wires the historical player, strategy engine, order gateway (paper
//! mode backed by the fill simulator) and position/risk service over
//! in-process ring transports. The simulator's market state is driven by
//! the same stream the strategies consume, so price semantics match the
//! live path modulo the chosen fill model.

use bus::{Publisher, Pusher, TransportFactory};
use common::constants::topics;
use common::{Clock, HeaderFactory, Message, TradingSignal};
use engine::gateway::{GatewayMode, OrderGateway};
use engine::momentum::{MomentumConfig, MomentumStrategy};
use engine::risk::RiskLimits;
use engine::service::PositionRiskService;
use engine::strategy::SignalSink;
use engine::StrategyEngine;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::recorder::MetricsHub;
use thiserror::Error;
use tracing::info;

use crate::fill::{FillConfig, FillSimulator, SimStats};
use crate::player::{HistoricalPlayer, PlayerConfig};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Feed(#[from] feeds::FeedError),

    #[error(transparent)]
    Transport(#[from] bus::TransportError),
}

#[derive(Clone, Debug)]
pub struct BacktestConfig {
    pub csv_path: PathBuf,
    /// Replay speed; 0 fast-forwards.
    pub speed: f64,
    pub start_ts_ms: Option<u64>,
    pub end_ts_ms: Option<u64>,
    pub fill: FillConfig,
    pub momentum: MomentumConfig,
    pub risk: RiskLimits,
}

impl BacktestConfig {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            speed: 0.0,
            start_ts_ms: None,
            end_ts_ms: None,
            fill: FillConfig::default(),
            momentum: MomentumConfig::default(),
            risk: RiskLimits::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SignalRecord {
    pub symbol: String,
    pub action: String,
    pub order_type: String,
    pub price: f64,
    pub quantity: u32,
    pub strategy_id: u64,
    pub confidence: f64,
}

impl From<&TradingSignal> for SignalRecord {
    fn from(signal: &TradingSignal) -> Self {
        Self {
            symbol: signal.symbol.to_string(),
            action: format!("{:?}", signal.action),
            order_type: format!("{:?}", signal.order_type),
            price: signal.price,
            quantity: signal.quantity,
            strategy_id: signal.strategy_id,
            confidence: signal.confidence,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct BacktestReport {
    pub ticks_replayed: u64,
    pub rows_skipped: u64,
    pub signals: Vec<SignalRecord>,
    pub orders_processed: u64,
    pub orders_filled: u64,
    pub risk_denials: u64,
    pub sim: SimStats,
    pub positions: Vec<PositionSummary>,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Run one full backtest to completion.
pub fn run_backtest(config: &BacktestConfig) -> Result<BacktestReport, BacktestError> {
    let (rows, rows_skipped) = feeds::load_csv(&config.csv_path)?;
    let clock = Arc::new(Clock::for_tests());
    let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
    let hub = MetricsHub::new(Arc::clone(&clock));
    let factory = TransportFactory::new();

    // Market data: player binds, everyone else listens.
    let md_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://bt-md")?);
    let engine_md = factory.subscriber("ring://bt-md", &[topics::MARKET_DATA, topics::ORDER_BOOK])?;
    let gateway_md = factory.subscriber("ring://bt-md", &[topics::MARKET_DATA])?;
    let risk_md = factory.subscriber("ring://bt-md", &[topics::MARKET_DATA])?;

    // Signals: engine pushes, gateway pulls, the harness records.
    let signal_pusher: Arc<dyn Pusher> = Arc::from(factory.pusher("ring://bt-signals")?);
    let gateway_signals = factory.puller("ring://bt-signals")?;
    let mut signal_tap = factory.puller("ring://bt-signals")?;

    // Executions: gateway publishes, strategies and risk subscribe.
    let exec_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://bt-exec")?);
    let engine_exec = factory.subscriber("ring://bt-exec", &[topics::EXECUTIONS])?;
    let risk_exec = factory.subscriber("ring://bt-exec", &[topics::EXECUTIONS])?;

    // Positions and risk alerts.
    let pos_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://bt-pos")?);

    let sink = SignalSink::new(signal_pusher, Arc::clone(&headers));
    let mut engine = StrategyEngine::new(
        "backtest-engine",
        engine_md,
        engine_exec,
        Arc::clone(&sink),
        Arc::clone(&hub),
    );
    engine.add_strategy(Box::new(MomentumStrategy::new(1001, config.momentum)));

    let simulator = FillSimulator::new(config.fill, Arc::clone(&clock));
    let sim_stats = simulator.stats_handle();
    let mut gateway = OrderGateway::new(
        GatewayMode::Paper,
        gateway_signals,
        gateway_md,
        exec_pub,
        Box::new(simulator),
        Arc::clone(&headers),
        Arc::clone(&hub),
    );

    let mut risk_service = PositionRiskService::new(
        risk_exec,
        risk_md,
        pos_pub,
        Arc::clone(&headers),
        Arc::clone(&hub),
        config.risk,
    );

    let mut player = HistoricalPlayer::new(
        rows,
        md_pub,
        Arc::clone(&headers),
        PlayerConfig {
            speed: config.speed,
            start_ts_ms: config.start_ts_ms,
            end_ts_ms: config.end_ts_ms,
            ..PlayerConfig::default()
        },
    );

    risk_service.start();
    gateway.start();
    engine.start();
    player.start();
    player.join();

    let ticks_replayed = player.progress().published;
    wait_for_quiescence(&engine, &gateway, ticks_replayed);

    engine.stop();
    gateway.stop();
    risk_service.stop();

    // Pull the recorded signal stream off the tap.
    let mut signals = Vec::new();
    let mut buf = vec![0u8; 4096];
    while let Ok(Some(len)) = signal_tap.pull(&mut buf, true) {
        if let Ok(Message::TradingSignal(_, signal)) = Message::decode(&buf[..len]) {
            signals.push(SignalRecord::from(&signal));
        }
    }

    let positions: Vec<PositionSummary> = risk_service
        .positions_snapshot()
        .iter()
        .map(|p| PositionSummary {
            symbol: p.symbol.to_string(),
            quantity: p.quantity,
            average_price: p.average_price,
            realized_pnl: p.realized_pnl,
            unrealized_pnl: p.unrealized_pnl,
        })
        .collect();
    let (realized_pnl, unrealized_pnl) = risk_service.total_pnl();

    let report = BacktestReport {
        ticks_replayed,
        rows_skipped,
        signals,
        orders_processed: gateway.orders_processed(),
        orders_filled: gateway.orders_filled(),
        risk_denials: risk_service.risk_denials(),
        sim: *sim_stats.lock(),
        positions,
        realized_pnl,
        unrealized_pnl,
    };
    info!(
        ticks = report.ticks_replayed,
        signals = report.signals.len(),
        filled = report.orders_filled,
        realized = report.realized_pnl,
        "backtest complete"
    );
    Ok(report)
}

/// Wait until the pipeline has consumed everything the player produced
/// and the flow of orders has settled.
fn wait_for_quiescence(engine: &StrategyEngine, gateway: &OrderGateway, ticks: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.ticks_processed() < ticks && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let mut last = (gateway.orders_processed(), gateway.orders_filled());
    let mut stable_since = Instant::now();
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
        let now = (gateway.orders_processed(), gateway.orders_filled());
        if now == last {
            if stable_since.elapsed() >= Duration::from_millis(300) {
                break;
            }
        } else {
            last = now;
            stable_since = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn trending_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,symbol,open,high,low,close,volume,bid,ask").unwrap();
        // A steady uptrend: every step is +0.5% on the mid.
        let mut price = 100.0f64;
        for i in 0..40 {
            let ts = 1000 + i * 1000;
            writeln!(
                file,
                "{ts},AAPL,{o:.4},{h:.4},{l:.4},{c:.4},10000,{b:.4},{a:.4}",
                o = price,
                h = price * 1.001,
                l = price * 0.999,
                c = price,
                b = price * 0.9995,
                a = price * 1.0005,
            )
            .unwrap();
            price *= 1.005;
        }
        file
    }

    fn fast_config(path: &std::path::Path) -> BacktestConfig {
        BacktestConfig {
            speed: 0.0,
            momentum: MomentumConfig {
                threshold: 0.001,
                min_signal_interval_ms: 0,
                order_quantity: 10,
            },
            fill: FillConfig {
                model: crate::fill::FillModel::Immediate,
                min_latency_ms: 0,
                max_latency_ms: 0,
                seed: 1,
                ..FillConfig::default()
            },
            ..BacktestConfig::new(path)
        }
    }

    #[test]
    fn uptrend_backtest_produces_buys_and_fills() {
        let file = trending_csv();
        let report = run_backtest(&fast_config(file.path())).unwrap();

        assert_eq!(report.ticks_replayed, 40);
        assert!(!report.signals.is_empty(), "uptrend must trigger signals");
        assert!(report.signals.iter().all(|s| s.action == "Buy"));
        assert!(report.orders_filled > 0, "paper mode must fill");
        assert_eq!(report.positions.len(), 1);
        assert!(report.positions[0].quantity > 0);
    }

    #[test]
    fn replay_is_deterministic_at_speed_zero() {
        let file = trending_csv();
        let config = fast_config(file.path());
        let a = run_backtest(&config).unwrap();
        let b = run_backtest(&config).unwrap();

        let a_json = serde_json::to_string(&a.signals).unwrap();
        let b_json = serde_json::to_string(&b.signals).unwrap();
        assert_eq!(a_json, b_json, "signal sequences must be byte-identical");
    }
}
