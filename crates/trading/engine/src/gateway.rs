//! Order gateway
//!
//! Consumes signals, assigns order ids, routes orders to the execution
//! backend (paper simulator or live broker) and republishes every
//! execution on the executions topic. Terminal executions evict the order
//! from the active map; duplicate `(order_id, exec_seq)` deliveries are
//! ignored.

use bus::{Publisher, Puller, Subscriber};
use common::constants::topics;
use common::{
    ExecutionType, HeaderFactory, MarketData, Message, OrderExecution, SignalAction, TradingSignal,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry::names;
use telemetry::recorder::MetricsHub;
use tracing::{debug, info, warn};

const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Where orders go once accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayMode {
    Paper,
    Live,
}

/// Backend the gateway trades against. The paper implementation is the
/// fill simulator; live implementations wrap a broker adapter.
pub trait ExecutionBackend: Send {
    fn submit_order(&mut self, order_id: u64, signal: &TradingSignal);
    fn cancel_order(&mut self, order_id: u64) -> bool;

    /// Market state refresh (paper backends price against this).
    fn on_market_data(&mut self, tick: &MarketData);

    /// Executions produced since the last poll, in fill order.
    fn poll_executions(&mut self) -> Vec<OrderExecution>;

    fn name(&self) -> &str;
}

/// Order lifecycle: received → validated → submitted → terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderState {
    Submitted,
    PartiallyFilled,
}

struct ActiveOrder {
    signal: TradingSignal,
    state: OrderState,
    filled: u64,
    last_exec_seq: u32,
}

pub struct OrderGateway {
    mode: GatewayMode,
    signals: Option<Box<dyn Puller>>,
    market_data: Option<Box<dyn Subscriber>>,
    executions_pub: Arc<dyn Publisher>,
    backend: Option<Box<dyn ExecutionBackend>>,
    headers: Arc<HeaderFactory>,
    hub: Arc<MetricsHub>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    orders_processed: Arc<AtomicU64>,
    orders_filled: Arc<AtomicU64>,
    duplicates_ignored: Arc<AtomicU64>,
}

impl OrderGateway {
    pub fn new(
        mode: GatewayMode,
        signals: Box<dyn Puller>,
        market_data: Box<dyn Subscriber>,
        executions_pub: Arc<dyn Publisher>,
        backend: Box<dyn ExecutionBackend>,
        headers: Arc<HeaderFactory>,
        hub: Arc<MetricsHub>,
    ) -> Self {
        Self {
            mode,
            signals: Some(signals),
            market_data: Some(market_data),
            executions_pub,
            backend: Some(backend),
            headers,
            hub,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            orders_processed: Arc::new(AtomicU64::new(0)),
            orders_filled: Arc::new(AtomicU64::new(0)),
            duplicates_ignored: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let (Some(signals), Some(market_data), Some(backend)) = (
            self.signals.take(),
            self.market_data.take(),
            self.backend.take(),
        ) else {
            return;
        };
        let mut worker = GatewayWorker {
            mode: self.mode,
            signals,
            market_data,
            executions_pub: Arc::clone(&self.executions_pub),
            backend,
            headers: Arc::clone(&self.headers),
            hub: Arc::clone(&self.hub),
            running: Arc::clone(&self.running),
            orders_processed: Arc::clone(&self.orders_processed),
            orders_filled: Arc::clone(&self.orders_filled),
            duplicates_ignored: Arc::clone(&self.duplicates_ignored),
            next_order_id: 1,
            active: FxHashMap::default(),
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
            processed = self.orders_processed.load(Ordering::Relaxed),
            filled = self.orders_filled.load(Ordering::Relaxed),
            "order gateway stopped"
        );
    }

    pub fn orders_processed(&self) -> u64 {
        self.orders_processed.load(Ordering::Relaxed)
    }

    pub fn orders_filled(&self) -> u64 {
        self.orders_filled.load(Ordering::Relaxed)
    }

    pub fn duplicates_ignored(&self) -> u64 {
        self.duplicates_ignored.load(Ordering::Relaxed)
    }
}

impl Drop for OrderGateway {
    fn drop(&mut self) {
        self.stop();
    }
}

struct GatewayWorker {
    mode: GatewayMode,
    signals: Box<dyn Puller>,
    market_data: Box<dyn Subscriber>,
    executions_pub: Arc<dyn Publisher>,
    backend: Box<dyn ExecutionBackend>,
    headers: Arc<HeaderFactory>,
    hub: Arc<MetricsHub>,
    running: Arc<AtomicBool>,
    orders_processed: Arc<AtomicU64>,
    orders_filled: Arc<AtomicU64>,
    duplicates_ignored: Arc<AtomicU64>,
    next_order_id: u64,
    active: FxHashMap<u64, ActiveOrder>,
}

impl GatewayWorker {
    fn run(&mut self) {
        info!(mode = ?self.mode, backend = self.backend.name(), "order gateway started");
        let recorder = self.hub.recorder();
        let clock = Arc::clone(recorder.clock());
        let mut buf = vec![0u8; 64 * 1024];

        while self.running.load(Ordering::Acquire) {
            let mut idle = true;

            match self.signals.pull(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    let t0 = clock.now_ticks();
                    match Message::decode(&buf[..len]) {
                        Ok(Message::TradingSignal(_, signal)) => {
                            self.handle_signal(&signal, &recorder);
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "undecodable signal frame"),
                    }
                    recorder.record_latency(
                        names::ORDER_PROCESS_LATENCY,
                        clock.elapsed_ns(t0, clock.now_ticks()),
                    );
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "signal pull error"),
            }

            match self.market_data.recv(&mut buf, true) {
                Ok(Some(len)) => {
                    idle = false;
                    if let Ok(Message::MarketData(_, tick)) = Message::decode(&buf[..len]) {
                        self.backend.on_market_data(&tick);
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "gateway market data receive error"),
            }

            for execution in self.backend.poll_executions() {
                idle = false;
                self.handle_execution(&execution, &recorder);
            }

            if idle {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
    }

    fn handle_signal(&mut self, signal: &TradingSignal, recorder: &telemetry::ThreadRecorder) {
        match signal.action {
            SignalAction::Buy | SignalAction::Sell => {}
            SignalAction::Cancel => {
                // Cancels address every working order on the symbol.
                let ids: Vec<u64> = self
                    .active
                    .iter()
                    .filter(|(_, o)| o.signal.symbol == signal.symbol)
                    .map(|(id, _)| *id)
                    .collect();
                for id in ids {
                    self.backend.cancel_order(id);
                }
                return;
            }
            SignalAction::Modify => {
                debug!(symbol = %signal.symbol, "modify not supported, ignoring");
                return;
            }
        }
        if !signal.is_valid() {
            warn!(symbol = %signal.symbol, "rejecting malformed signal");
            return;
        }

        let order_id = self.next_order_id;
        self.next_order_id += 1;
        self.active.insert(
            order_id,
            ActiveOrder {
                signal: *signal,
                state: OrderState::Submitted,
                filled: 0,
                last_exec_seq: 0,
            },
        );
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
        recorder.increment_counter(names::ORDERS_SUBMITTED);
        debug!(
            order_id,
            symbol = %signal.symbol,
            action = ?signal.action,
            quantity = signal.quantity,
            "order submitted"
        );
        self.backend.submit_order(order_id, signal);
    }

    fn handle_execution(&mut self, execution: &OrderExecution, recorder: &telemetry::ThreadRecorder) {
        let Some(order) = self.active.get_mut(&execution.order_id) else {
            // Late executions for evicted orders are duplicates by
            // definition.
            self.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if execution.exec_seq <= order.last_exec_seq {
            self.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
            debug!(
                order_id = execution.order_id,
                exec_seq = execution.exec_seq,
                "duplicate execution ignored"
            );
            return;
        }
        order.last_exec_seq = execution.exec_seq;
        order.filled += u64::from(execution.fill_quantity);
        order.state = OrderState::PartiallyFilled;

        let frame = self.headers.frame(execution);
        if let Err(err) = self.executions_pub.publish(topics::EXECUTIONS, &frame, true) {
            warn!(%err, "execution publish failed");
        }

        if execution.is_terminal() {
            if execution.exec_type == ExecutionType::Fill {
                self.orders_filled.fetch_add(1, Ordering::Relaxed);
                recorder.increment_counter(names::ORDERS_FILLED);
            }
            if let Some(done) = self.active.remove(&execution.order_id) {
                debug!(
                    order_id = execution.order_id,
                    total_filled = done.filled,
                    state = ?done.state,
                    exec_type = ?execution.exec_type,
                    "order closed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::TransportFactory;
    use common::{Clock, OrderType, Symbol};

    /// Backend that fills every order immediately, optionally repeating
    /// each execution to exercise the dedup path.
    struct EchoBackend {
        pending: Vec<OrderExecution>,
        duplicate: bool,
    }

    impl ExecutionBackend for EchoBackend {
        fn submit_order(&mut self, order_id: u64, signal: &TradingSignal) {
            let exec = OrderExecution {
                order_id,
                symbol: signal.symbol,
                exec_type: ExecutionType::Fill,
                side: signal.action,
                exec_seq: 1,
                fill_price: 100.0,
                fill_quantity: signal.quantity,
                remaining_quantity: 0,
                commission: 1.0,
            };
            self.pending.push(exec);
            if self.duplicate {
                self.pending.push(exec);
            }
        }

        fn cancel_order(&mut self, _order_id: u64) -> bool {
            false
        }

        fn on_market_data(&mut self, _tick: &MarketData) {}

        fn poll_executions(&mut self) -> Vec<OrderExecution> {
            std::mem::take(&mut self.pending)
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn run_gateway(duplicate: bool) -> (u64, u64, Vec<OrderExecution>) {
        let clock = Arc::new(Clock::for_tests());
        let headers = Arc::new(HeaderFactory::new(Arc::clone(&clock)));
        let factory = TransportFactory::new();

        let signal_pusher = factory.pusher("ring://gw-signals").unwrap();
        let signals = factory.puller("ring://gw-signals").unwrap();
        let md_pub = factory.publisher("ring://gw-md").unwrap();
        let market_data = factory
            .subscriber("ring://gw-md", &[topics::MARKET_DATA])
            .unwrap();
        let _ = md_pub;
        let exec_pub: Arc<dyn Publisher> = Arc::from(factory.publisher("ring://gw-exec").unwrap());
        let mut exec_sub = factory
            .subscriber("ring://gw-exec", &[topics::EXECUTIONS])
            .unwrap();

        let mut gateway = OrderGateway::new(
            GatewayMode::Paper,
            signals,
            market_data,
            exec_pub,
            Box::new(EchoBackend {
                pending: Vec::new(),
                duplicate,
            }),
            Arc::clone(&headers),
            MetricsHub::new(clock),
        );
        gateway.start();

        let signal = TradingSignal {
            symbol: Symbol::new("AAPL"),
            action: SignalAction::Buy,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: 100,
            strategy_id: 1,
            confidence: 1.0,
        };
        signal_pusher.push(&headers.frame(&signal), true).unwrap();

        let mut executions = Vec::new();
        let mut buf = vec![0u8; 4096];
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while executions.is_empty() && std::time::Instant::now() < deadline {
            if let Ok(Some(len)) = exec_sub.recv(&mut buf, false) {
                if let Ok(Message::OrderExecution(_, e)) = Message::decode(&buf[..len]) {
                    executions.push(e);
                }
            }
        }
        // Allow any duplicate publication to surface before stopping.
        std::thread::sleep(Duration::from_millis(100));
        while let Ok(Some(len)) = exec_sub.recv(&mut buf, true) {
            if let Ok(Message::OrderExecution(_, e)) = Message::decode(&buf[..len]) {
                executions.push(e);
            }
        }
        gateway.stop();
        (
            gateway.orders_filled(),
            gateway.duplicates_ignored(),
            executions,
        )
    }

    #[test]
    fn signal_becomes_published_execution() {
        let (filled, _, executions) = run_gateway(false);
        assert_eq!(filled, 1);
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].order_id, 1);
        assert_eq!(executions[0].exec_type, ExecutionType::Fill);
        assert_eq!(executions[0].fill_quantity, 100);
    }

    #[test]
    fn duplicate_exec_seq_is_ignored() {
        let (filled, duplicates, executions) = run_gateway(true);
        assert_eq!(filled, 1);
        assert!(duplicates >= 1, "duplicate must be counted");
        assert_eq!(executions.len(), 1, "duplicate must not be republished");
    }
}
