//! Strategy capability set and signal submission handle

use bus::Pusher;
use common::{Clock, HeaderFactory, MarketData, OrderBookUpdate, OrderExecution, TradingSignal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// A trading strategy. The engine calls back in registration order, always
/// from its single processing thread, so implementations keep plain
/// mutable state.
pub trait Strategy: Send {
    fn id(&self) -> u64;
    fn name(&self) -> &str;

    fn on_market_data(&mut self, tick: &MarketData, ctx: &StrategyCtx);

    fn on_execution(&mut self, _execution: &OrderExecution, _ctx: &StrategyCtx) {}

    /// L2 updates, for strategies that read book shape.
    fn on_book_update(&mut self, _update: &OrderBookUpdate, _ctx: &StrategyCtx) {}
}

/// What a strategy sees on every callback: the submission handle and the
/// clock. Strategies never reference the engine itself.
pub struct StrategyCtx {
    sink: Arc<SignalSink>,
}

impl StrategyCtx {
    pub fn new(sink: Arc<SignalSink>) -> Self {
        Self { sink }
    }

    pub fn submit(&self, signal: &TradingSignal) -> bool {
        self.sink.submit(signal)
    }

    pub fn now_ns(&self) -> u64 {
        self.sink.clock().now_ns()
    }

    pub fn clock(&self) -> &Arc<Clock> {
        self.sink.clock()
    }
}

/// Forwards signals to the signals pipe. Shared between the engine (which
/// owns the enable switch) and every registered strategy.
pub struct SignalSink {
    pusher: Arc<dyn Pusher>,
    headers: Arc<HeaderFactory>,
    enabled: AtomicBool,
    submitted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
}

impl SignalSink {
    pub fn new(pusher: Arc<dyn Pusher>, headers: Arc<HeaderFactory>) -> Arc<Self> {
        Arc::new(Self {
            pusher,
            headers,
            enabled: AtomicBool::new(true),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Validate and forward one signal. Returns false when the signal was
    /// malformed, trading is paused, or the pipe pushed back.
    pub fn submit(&self, signal: &TradingSignal) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if !signal.is_valid() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %signal.symbol, "rejecting malformed signal");
            return false;
        }
        let frame = self.headers.frame(signal);
        match self.pusher.push(&frame, true) {
            Ok(true) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    symbol = %signal.symbol,
                    action = ?signal.action,
                    quantity = signal.quantity,
                    "signal submitted"
                );
                true
            }
            Ok(false) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "signal push failed");
                false
            }
        }
    }

    /// Pause/resume signal flow (driven by control commands).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clock(&self) -> &Arc<Clock> {
        self.headers.clock()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bus::TransportFactory;
    use common::Message;

    /// Ring-backed sink plus a drain function for captured signals.
    pub fn capture_sink(name: &str) -> (Arc<SignalSink>, impl FnMut() -> Vec<TradingSignal>) {
        let factory = TransportFactory::new();
        let endpoint = format!("ring://{name}");
        let pusher: Arc<dyn Pusher> = Arc::from(factory.pusher(&endpoint).unwrap());
        let mut puller = factory.puller(&endpoint).unwrap();
        let clock = Arc::new(Clock::for_tests());
        let sink = SignalSink::new(pusher, Arc::new(HeaderFactory::new(clock)));

        let drain = move || {
            let mut out = Vec::new();
            let mut buf = vec![0u8; 4096];
            while let Ok(Some(len)) = puller.pull(&mut buf, true) {
                if let Ok(Message::TradingSignal(_, signal)) = Message::decode(&buf[..len]) {
                    out.push(signal);
                }
            }
            out
        };
        (sink, drain)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::capture_sink;
    use super::*;
    use common::{OrderType, SignalAction, Symbol};

    fn signal(symbol: &str, qty: u32) -> TradingSignal {
        TradingSignal {
            symbol: Symbol::new(symbol),
            action: SignalAction::Buy,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: qty,
            strategy_id: 1,
            confidence: 1.0,
        }
    }

    #[test]
    fn valid_signal_reaches_puller() {
        let (sink, mut drain) = capture_sink("sink-valid");
        assert!(sink.submit(&signal("AAPL", 100)));
        let signals = drain();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].quantity, 100);
        assert_eq!(sink.submitted(), 1);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let (sink, mut drain) = capture_sink("sink-zero");
        assert!(!sink.submit(&signal("AAPL", 0)));
        assert!(drain().is_empty());
        assert_eq!(sink.rejected(), 1);
    }

    #[test]
    fn paused_sink_rejects() {
        let (sink, mut drain) = capture_sink("sink-paused");
        sink.set_enabled(false);
        assert!(!sink.submit(&signal("AAPL", 10)));
        sink.set_enabled(true);
        assert!(sink.submit(&signal("AAPL", 10)));
        assert_eq!(drain().len(), 1);
    }
}
