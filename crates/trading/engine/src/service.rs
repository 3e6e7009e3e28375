//! Position & risk service
//!
//! Subscribes to executions and market data, maintains the position book,
//! publishes a `PositionUpdate` after every change and evaluates risk on
//! observed signals. Risk enforcement is centralized here: in-process
//! deployments consult [`PositionRiskService::evaluate_signal`] pre-trade;
//! out-of-process ones receive the alerts as information.

use bus::{Publisher, Subscriber};
use common::constants::topics;
use common::{HeaderFactory, Message, RiskAlert, TradingSignal};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry::names;
use telemetry::recorder::MetricsHub;
use tracing::{info, warn};

use crate::position::{Position, PositionBook};
use crate::risk::{RiskDecision, RiskEngine, RiskLimits};

const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Shared state behind one mutex: the processing thread is the only
/// writer, pre-trade checks and snapshots read.
struct Shared {
    positions: PositionBook,
    risk: RiskEngine,
}

pub struct PositionRiskService {
    executions: Option<Box<dyn Subscriber>>,
    market_data: Option<Box<dyn Subscriber>>,
    signals: Option<Box<dyn Subscriber>>,
    positions_pub: Arc<dyn Publisher>,
    headers: Arc<HeaderFactory>,
    hub: Arc<MetricsHub>,
    shared: Arc<Mutex<Shared>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    updates_published: Arc<AtomicU64>,
}

impl PositionRiskService {
    pub fn new(
        executions: Box<dyn Subscriber>,
        market_data: Box<dyn Subscriber>,
        positions_pub: Arc<dyn Publisher>,
        headers: Arc<HeaderFactory>,
        hub: Arc<MetricsHub>,
        limits: RiskLimits,
    ) -> Self {
        Self {
            executions: Some(executions),
            market_data: Some(market_data),
            signals: None,
            positions_pub,
            headers,
            hub,
            shared: Arc::new(Mutex::new(Shared {
                positions: PositionBook::new(),
                risk: RiskEngine::new(limits),
            })),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            updates_published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Also observe the signals pipe for informational risk evaluation.
    pub fn with_signal_feed(mut self, signals: Box<dyn Subscriber>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Pre-trade check used when the service is wired in-line with the
    /// signal path. Denials are published as risk alerts either way.
    pub fn evaluate_signal(&self, signal: &TradingSignal) -> RiskDecision {
        let mut shared = self.shared.lock();
        let decision = {
            let Shared { positions, risk } = &mut *shared;
            risk.evaluate(signal, positions)
        };
        if let RiskDecision::Deny(alert) = &decision {
            self.publish_alert(alert);
        }
        decision
    }

    /// Copy of a symbol's position, if any.
    pub fn position(&self, symbol: &common::Symbol) -> Option<Position> {
        self.shared.lock().positions.get(symbol).copied()
    }

    /// Copies of every position, sorted by symbol.
    pub fn positions_snapshot(&self) -> Vec<Position> {
        let shared = self.shared.lock();
        let mut out: Vec<Position> = shared.positions.iter().copied().collect();
        out.sort_by_key(|p| p.symbol);
        out
    }

    pub fn total_pnl(&self) -> (f64, f64) {
        let shared = self.shared.lock();
        (
            shared.positions.total_realized(),
            shared.positions.total_unrealized(),
        )
    }

    pub fn updates_published(&self) -> u64 {
        self.updates_published.load(Ordering::Relaxed)
    }

    pub fn risk_denials(&self) -> u64 {
        self.shared.lock().risk.denials()
    }

    fn publish_alert(&self, alert: &RiskAlert) {
        let frame = self.headers.frame(alert);
        if let Err(err) = self.positions_pub.publish(topics::RISK, &frame, true) {
            warn!(%err, "risk alert publish failed");
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let (Some(executions), Some(market_data)) =
            (self.executions.take(), self.market_data.take())
        else {
            return;
        };
        let signals = self.signals.take();

        let mut worker = ServiceWorker {
            executions,
            market_data,
            signals,
            positions_pub: Arc::clone(&self.positions_pub),
            headers: Arc::clone(&self.headers),
            hub: Arc::clone(&self.hub),
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&self.running),
            updates_published: Arc::clone(&self.updates_published),
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
        let (realized, unrealized) = self.total_pnl();
        info!(realized, unrealized, "position/risk service stopped");
    }
}

impl Drop for PositionRiskService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ServiceWorker {
    executions: Box<dyn Subscriber>,
    market_data: Box<dyn Subscriber>,
    signals: Option<Box<dyn Subscriber>>,
    positions_pub: Arc<dyn Publisher>,
    headers: Arc<HeaderFactory>,
    hub: Arc<MetricsHub>,
    shared: Arc<Mutex<Shared>>,
    running: Arc<AtomicBool>,
    updates_published: Arc<AtomicU64>,
}

impl ServiceWorker {
    fn run(&mut self) {
        info!("position/risk service processing thread started");
        let recorder = self.hub.recorder();
        let mut buf = vec![0u8; 64 * 1024];

        while self.running.load(Ordering::Acquire) {
            let mut idle = true;

            match self.executions.recv(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    if let Ok(Message::OrderExecution(_, execution)) = Message::decode(&buf[..len])
                    {
                        let changed = self.shared.lock().positions.apply_execution(&execution);
                        if let Some(position) = changed {
                            self.publish_position(&position, &recorder);
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "executions receive error"),
            }

            match self.market_data.recv(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    if let Ok(Message::MarketData(_, tick)) = Message::decode(&buf[..len]) {
                        let changed = self
                            .shared
                            .lock()
                            .positions
                            .mark(&tick.symbol, tick.last_price);
                        if let Some(position) = changed {
                            self.publish_position(&position, &recorder);
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "market data receive error"),
            }

            if let Some(signals) = self.signals.as_mut() {
                if let Ok(Some(len)) = signals.recv(&mut buf, true) {
                    idle = false;
                    if let Ok(Message::TradingSignal(_, signal)) = Message::decode(&buf[..len]) {
                        let alert = {
                            let mut shared = self.shared.lock();
                            let Shared { positions, risk } = &mut *shared;
                            match risk.evaluate(&signal, positions) {
                                RiskDecision::Deny(alert) => Some(alert),
                                RiskDecision::Accept => None,
                            }
                        };
                        if let Some(alert) = alert {
                            let frame = self.headers.frame(&alert);
                            let _ = self.positions_pub.publish(topics::RISK, &frame, true);
                        }
                    }
                }
            }

            if idle {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        info!("position/risk service processing thread stopped");
    }

    fn publish_position(&self, position: &Position, recorder: &telemetry::ThreadRecorder) {
        let update = position.to_update();
        let frame = self.headers.frame(&update);
        match self.positions_pub.publish(topics::POSITIONS, &frame, true) {
            Ok(true) => {
                self.updates_published.fetch_add(1, Ordering::Relaxed);
                recorder.set_gauge(
                    names::POSITIONS_OPEN,
                    self.shared.lock().positions.open_count() as u64,
                );
            }
            Ok(false) => {}
            Err(err) => warn!(%err, "position publish failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::TransportFactory;
    use common::{
        Clock, ExecutionType, OrderExecution, OrderType, PositionUpdate, SignalAction, Symbol,
    };

    fn exec(side: SignalAction, qty: u32, price: f64) -> OrderExecution {
        OrderExecution {
            order_id: 7,
            symbol: Symbol::new("AAPL"),
            exec_type: ExecutionType::Fill,
            side,
            exec_seq: 1,
            fill_price: price,
            fill_quantity: qty,
            remaining_quantity: 0,
            commission: 0.5,
        }
    }

    #[test]
    fn executions_produce_position_updates() {
        let clock = Arc::new(Clock::for_tests());
        let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
        let factory = TransportFactory::new();

        let exec_pub = factory.publisher("ring://pr-exec").unwrap();
        let executions = factory
            .subscriber("ring://pr-exec", &[topics::EXECUTIONS])
            .unwrap();
        let md_pub = factory.publisher("ring://pr-md").unwrap();
        let market_data = factory
            .subscriber("ring://pr-md", &[topics::MARKET_DATA])
            .unwrap();
        let _ = md_pub;
        let pos_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://pr-pos").unwrap());
        let mut pos_sub = factory
            .subscriber("ring://pr-pos", &[topics::POSITIONS])
            .unwrap();

        let mut service = PositionRiskService::new(
            executions,
            market_data,
            pos_pub,
            Arc::clone(&headers),
            MetricsHub::new(clock),
            RiskLimits::default(),
        );
        service.start();

        exec_pub
            .publish(
                topics::EXECUTIONS,
                &headers.frame(&exec(SignalAction::Buy, 100, 10.0)),
                true,
            )
            .unwrap();

        let mut buf = vec![0u8; 4096];
        let mut update: Option<PositionUpdate> = None;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while update.is_none() && std::time::Instant::now() < deadline {
            if let Ok(Some(len)) = pos_sub.recv(&mut buf, false) {
                if let Ok(Message::PositionUpdate(_, u)) = Message::decode(&buf[..len]) {
                    update = Some(u);
                }
            }
        }
        service.stop();

        let update = update.expect("position update must be published");
        assert_eq!(update.position, 100);
        assert_eq!(update.average_price, 10.0);
        assert_eq!(service.updates_published(), 1);
        assert_eq!(
            service.position(&Symbol::new("AAPL")).unwrap().quantity,
            100
        );
    }

    #[test]
    fn inline_risk_denial_emits_alert() {
        let clock = Arc::new(Clock::for_tests());
        let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
        let factory = TransportFactory::new();

        let _exec_pub = factory.publisher("ring://pr2-exec").unwrap();
        let executions = factory.subscriber("ring://pr2-exec", &[]).unwrap();
        let _md_pub = factory.publisher("ring://pr2-md").unwrap();
        let market_data = factory.subscriber("ring://pr2-md", &[]).unwrap();
        let pos_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://pr2-pos").unwrap());
        let mut risk_sub = factory
            .subscriber("ring://pr2-pos", &[topics::RISK])
            .unwrap();

        let service = PositionRiskService::new(
            executions,
            market_data,
            pos_pub,
            Arc::clone(&headers),
            MetricsHub::new(clock),
            RiskLimits {
                position_limit_per_symbol: 10,
                ..RiskLimits::default()
            },
        );

        let signal = TradingSignal {
            symbol: Symbol::new("AAPL"),
            action: SignalAction::Buy,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: 100,
            strategy_id: 1,
            confidence: 1.0,
        };
        assert!(!service.evaluate_signal(&signal).is_accept());
        assert_eq!(service.risk_denials(), 1);

        let mut buf = vec![0u8; 4096];
        let len = risk_sub.recv(&mut buf, true).unwrap().unwrap();
        match Message::decode(&buf[..len]).unwrap() {
            Message::RiskAlert(_, alert) => {
                assert_eq!(alert.symbol, Symbol::new("AAPL"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
