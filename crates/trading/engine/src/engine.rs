//! Strategy engine
//!
//! One processing thread fans market data, book updates and executions
//! into the registered strategies in registration order. Signals leave
//! through the shared [`SignalSink`]; control commands flip the sink's
//! enable switch.

use bus::Subscriber;
use common::{ControlAction, Message};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry::names;
use telemetry::recorder::MetricsHub;
use tracing::{debug, info, warn};

use crate::strategy::{SignalSink, Strategy, StrategyCtx};

const IDLE_SLEEP: Duration = Duration::from_micros(200);
const STATS_INTERVAL: Duration = Duration::from_secs(30);

pub struct StrategyEngine {
    service_name: String,
    strategies: Vec<Box<dyn Strategy>>,
    market_data: Option<Box<dyn Subscriber>>,
    executions: Option<Box<dyn Subscriber>>,
    control: Option<Box<dyn Subscriber>>,
    sink: Arc<SignalSink>,
    hub: Arc<MetricsHub>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    ticks_processed: Arc<AtomicU64>,
}

impl StrategyEngine {
    pub fn new(
        service_name: impl Into<String>,
        market_data: Box<dyn Subscriber>,
        executions: Box<dyn Subscriber>,
        sink: Arc<SignalSink>,
        hub: Arc<MetricsHub>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            strategies: Vec::new(),
            market_data: Some(market_data),
            executions: Some(executions),
            control: None,
            sink,
            hub,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            ticks_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a control-topic subscriber (optional).
    pub fn with_control(mut self, control: Box<dyn Subscriber>) -> Self {
        self.control = Some(control);
        self
    }

    /// Register a strategy. Dispatch follows registration order.
    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        info!(
            id = strategy.id(),
            name = strategy.name(),
            "strategy registered"
        );
        self.strategies.push(strategy);
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    pub fn sink(&self) -> &Arc<SignalSink> {
        &self.sink
    }

    pub fn ticks_processed(&self) -> u64 {
        self.ticks_processed.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("strategy engine already running");
            return;
        }
        let (Some(market_data), Some(executions)) =
            (self.market_data.take(), self.executions.take())
        else {
            return;
        };
        let control = self.control.take();

        let mut worker = EngineWorker {
            service_name: self.service_name.clone(),
            strategies: std::mem::take(&mut self.strategies),
            market_data,
            executions,
            control,
            ctx: StrategyCtx::new(Arc::clone(&self.sink)),
            sink: Arc::clone(&self.sink),
            hub: Arc::clone(&self.hub),
            running: Arc::clone(&self.running),
            ticks_processed: Arc::clone(&self.ticks_processed),
        };
        self.thread = Some(std::thread::spawn(move || worker.run()));
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        info!(
            signals = self.sink.submitted(),
            ticks = self.ticks_processed.load(Ordering::Relaxed),
            "strategy engine stopped"
        );
    }
}

impl Drop for StrategyEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct EngineWorker {
    service_name: String,
    strategies: Vec<Box<dyn Strategy>>,
    market_data: Box<dyn Subscriber>,
    executions: Box<dyn Subscriber>,
    control: Option<Box<dyn Subscriber>>,
    ctx: StrategyCtx,
    sink: Arc<SignalSink>,
    hub: Arc<MetricsHub>,
    running: Arc<AtomicBool>,
    ticks_processed: Arc<AtomicU64>,
}

impl EngineWorker {
    fn run(&mut self) {
        info!(
            strategies = self.strategies.len(),
            "strategy engine processing thread started"
        );
        let recorder = self.hub.recorder();
        let clock = Arc::clone(recorder.clock());
        let mut buf = vec![0u8; 64 * 1024];
        let mut last_stats = std::time::Instant::now();

        while self.running.load(Ordering::Acquire) {
            let mut idle = true;

            match self.market_data.recv(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    let t0 = clock.now_ticks();
                    match Message::decode(&buf[..len]) {
                        Ok(Message::MarketData(_, tick)) => {
                            for strategy in &mut self.strategies {
                                strategy.on_market_data(&tick, &self.ctx);
                            }
                            self.ticks_processed.fetch_add(1, Ordering::Relaxed);
                            recorder.increment_counter(names::MESSAGES_PROCESSED);
                        }
                        Ok(Message::OrderBookUpdate(_, update)) => {
                            for strategy in &mut self.strategies {
                                strategy.on_book_update(&update, &self.ctx);
                            }
                        }
                        Ok(other) => {
                            debug!(msg_type = ?other.header().msg_type, "ignoring message on market data topic");
                        }
                        Err(err) => warn!(%err, "undecodable market data frame"),
                    }
                    recorder.record_latency(
                        names::STRATEGY_PROCESS_LATENCY,
                        clock.elapsed_ns(t0, clock.now_ticks()),
                    );
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "market data receive error"),
            }

            match self.executions.recv(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    match Message::decode(&buf[..len]) {
                        Ok(Message::OrderExecution(_, execution)) => {
                            for strategy in &mut self.strategies {
                                strategy.on_execution(&execution, &self.ctx);
                            }
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "undecodable execution frame"),
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "execution receive error"),
            }

            if let Some(control) = self.control.as_mut() {
                if let Ok(Some(len)) = control.recv(&mut buf, true) {
                    idle = false;
                    self.handle_control(&buf[..len]);
                }
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                debug!(
                    ticks = self.ticks_processed.load(Ordering::Relaxed),
                    signals = self.sink.submitted(),
                    dropped = self.sink.dropped(),
                    "strategy engine stats"
                );
                last_stats = std::time::Instant::now();
            }
            if idle {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        info!("strategy engine processing thread stopped");
    }

    fn handle_control(&mut self, frame: &[u8]) {
        let Ok(Message::ControlCommand(_, command)) = Message::decode(frame) else {
            return;
        };
        if !command.targets(&self.service_name) {
            return;
        }
        match command.action {
            ControlAction::StartTrading => {
                info!("trading enabled by control command");
                self.sink.set_enabled(true);
            }
            ControlAction::StopTrading | ControlAction::PauseTrading => {
                info!(action = ?command.action, "trading disabled by control command");
                self.sink.set_enabled(false);
            }
            ControlAction::ShutdownSystem => {
                info!("shutdown requested by control command");
                self.running.store(false, Ordering::Release);
            }
            ControlAction::RestartService | ControlAction::UpdateConfig => {
                debug!(action = ?command.action, "control action not handled in-process");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::momentum::{MomentumConfig, MomentumStrategy};
    use bus::{Pusher, TransportFactory};
    use common::constants::topics;
    use common::{Clock, HeaderFactory, MarketData, Symbol};

    #[test]
    fn engine_dispatches_ticks_and_emits_signals() {
        let clock = Arc::new(Clock::for_tests());
        let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
        let factory = TransportFactory::new();

        let md_pub = factory.publisher("ring://engine-md").unwrap();
        let md_sub = factory
            .subscriber("ring://engine-md", &[topics::MARKET_DATA, topics::ORDER_BOOK])
            .unwrap();
        let exec_pub = factory.publisher("ring://engine-exec").unwrap();
        let exec_sub = factory
            .subscriber("ring://engine-exec", &[topics::EXECUTIONS])
            .unwrap();
        let _ = exec_pub;

        let signal_pusher: Arc<dyn Pusher> =
            Arc::from(factory.pusher("ring://engine-signals").unwrap());
        let mut signal_puller = factory.puller("ring://engine-signals").unwrap();
        let sink = SignalSink::new(signal_pusher, Arc::clone(&headers));

        let mut engine = StrategyEngine::new(
            "strategy-engine",
            md_sub,
            exec_sub,
            sink,
            MetricsHub::new(clock),
        );
        engine.add_strategy(Box::new(MomentumStrategy::new(
            1001,
            MomentumConfig {
                threshold: 0.001,
                min_signal_interval_ms: 0,
                order_quantity: 50,
            },
        )));
        engine.start();

        let ticks = [
            (99.95, 100.05),
            (100.15, 100.25),
            (100.35, 100.45),
        ];
        for (bid, ask) in ticks {
            let tick = MarketData {
                symbol: Symbol::new("AAPL"),
                bid_price: bid,
                ask_price: ask,
                bid_size: 100,
                ask_size: 100,
                last_price: (bid + ask) / 2.0,
                last_size: 10,
                exchange_timestamp: 0,
            };
            md_pub
                .publish(topics::MARKET_DATA, &headers.frame(&tick), true)
                .unwrap();
        }

        let mut buf = vec![0u8; 4096];
        let mut signals = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while signals.len() < 2 && std::time::Instant::now() < deadline {
            if let Ok(Some(len)) = signal_puller.pull(&mut buf, false) {
                if let Ok(Message::TradingSignal(_, s)) = Message::decode(&buf[..len]) {
                    signals.push(s);
                }
            }
        }
        engine.stop();

        assert_eq!(signals.len(), 2, "both threshold moves must signal");
        assert!(engine.ticks_processed() >= 3);
    }
}
