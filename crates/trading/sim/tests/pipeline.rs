//! Full-pipeline flow over in-process rings: mock feed -> fan-out ->
//! strategy engine -> gateway (paper, fill simulator) -> executions ->
//! position/risk. The live and backtest paths share every component
//! exercised here.

use bus::{Publisher, Pusher, TransportFactory};
use common::constants::topics;
use common::{Clock, HeaderFactory};
use engine::StrategyEngine;
use engine::gateway::{GatewayMode, OrderGateway};
use engine::momentum::{MomentumConfig, MomentumStrategy};
use engine::risk::RiskLimits;
use engine::service::PositionRiskService;
use engine::strategy::SignalSink;
use feeds::{MarketDataHandler, MockFeed};
use sim::{FillConfig, FillModel, FillSimulator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry::recorder::MetricsHub;

#[test]
fn live_pipeline_turns_ticks_into_positions() {
    let clock = Arc::new(Clock::for_tests());
    let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
    let hub = MetricsHub::new(Arc::clone(&clock));
    let factory = TransportFactory::new();

    let md_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://pipe-md").unwrap());
    let engine_md = factory
        .subscriber("ring://pipe-md", &[topics::MARKET_DATA])
        .unwrap();
    let gateway_md = factory
        .subscriber("ring://pipe-md", &[topics::MARKET_DATA])
        .unwrap();
    let risk_md = factory
        .subscriber("ring://pipe-md", &[topics::MARKET_DATA])
        .unwrap();

    let signal_pusher: Arc<dyn Pusher> = Arc::from(factory.pusher("ring://pipe-sig").unwrap());
    let gateway_signals = factory.puller("ring://pipe-sig").unwrap();

    let exec_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://pipe-exec").unwrap());
    let engine_exec = factory
        .subscriber("ring://pipe-exec", &[topics::EXECUTIONS])
        .unwrap();
    let risk_exec = factory
        .subscriber("ring://pipe-exec", &[topics::EXECUTIONS])
        .unwrap();

    let pos_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://pipe-pos").unwrap());

    // Mock source tuned hot: every tick moves up to 5 bps, and the
    // momentum threshold is set low enough to fire regularly.
    let mut handler = MarketDataHandler::new(
        Box::new(MockFeed::new(&[("AAPL", 190.0)], 2000, 99)),
        md_pub,
        Arc::clone(&headers),
        Arc::clone(&hub),
    );

    let sink = SignalSink::new(signal_pusher, Arc::clone(&headers));
    let mut engine = StrategyEngine::new(
        "pipe-engine",
        engine_md,
        engine_exec,
        Arc::clone(&sink),
        Arc::clone(&hub),
    );
    engine.add_strategy(Box::new(MomentumStrategy::new(
        1001,
        MomentumConfig {
            threshold: 0.0001,
            min_signal_interval_ms: 0,
            order_quantity: 10,
        },
    )));

    let simulator = FillSimulator::new(
        FillConfig {
            model: FillModel::Immediate,
            min_latency_ms: 0,
            max_latency_ms: 0,
            seed: 4,
            ..FillConfig::default()
        },
        Arc::clone(&clock),
    );
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

    let mut risk = PositionRiskService::new(
        risk_exec,
        risk_md,
        pos_pub,
        Arc::clone(&headers),
        Arc::clone(&hub),
        RiskLimits::default(),
    );

    risk.start();
    gateway.start();
    engine.start();
    handler.start();

    // Run until fills have propagated into positions.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if gateway.orders_filled() > 0 && risk.updates_published() > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "pipeline never produced a fill");
        std::thread::sleep(Duration::from_millis(20));
    }

    handler.stop();
    engine.stop();
    gateway.stop();
    risk.stop();

    assert!(handler.processed() > 0);
    assert!(engine.ticks_processed() > 0);
    assert!(sink.submitted() > 0);
    assert!(gateway.orders_processed() >= gateway.orders_filled());

    let stats = *sim_stats.lock();
    assert!(stats.total_fills >= gateway.orders_filled());
    assert!(stats.total_commission > 0.0);

    let position = risk.position(&common::Symbol::new("AAPL"));
    assert!(position.is_some(), "fills must materialize a position");
}
