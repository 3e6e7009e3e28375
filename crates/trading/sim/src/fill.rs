//! Event-driven fill simulator
//!
//! Orders rest in an active map until market state makes them eligible;
//! eligibility schedules a [`FillEvent`] onto a min-heap keyed by fill
//! time, and `process_pending_fills` drains everything that has come due.
//! Exec sequences increase strictly per order so downstream consumers can
//! deduplicate. Orders for symbols without market state are held, never
//! failed.

use chrono::Timelike;
use common::{
    ExecutionType, MarketData, OrderExecution, OrderType, SignalAction, Symbol, TradingSignal,
};
use engine::gateway::ExecutionBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Volatility EMA decay for market-state updates.
const VOL_EMA_ALPHA: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FillModel {
    /// Exact price, full quantity, zero latency.
    Immediate,
    /// Slippage around the touch, full quantity.
    RealisticSlippage,
    /// Size-driven impact, liquidity-capped quantity.
    MarketImpact,
    /// Slippage + impact with simulated latency.
    LatencyAware,
    /// Randomized partial fills on top of slippage + impact.
    PartialFills,
}

#[derive(Clone, Copy, Debug)]
pub struct FillConfig {
    pub model: FillModel,
    pub slippage_factor: f64,
    pub volatility_impact: f64,
    pub market_impact_factor: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub partial_fill_probability: f64,
    pub commission_per_share: f64,
    pub commission_percentage: f64,
    pub minimum_commission: f64,
    /// Hold scheduling outside the session window.
    pub respect_market_hours: bool,
    /// Session bounds in minutes since midnight ET (UTC-5, no DST).
    pub session_open_minute: u32,
    pub session_close_minute: u32,
    /// Regenerate bid/ask around the last price with a price-dependent
    /// synthetic spread.
    pub synthetic_spreads: bool,
    pub seed: u64,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            model: FillModel::RealisticSlippage,
            slippage_factor: 0.0005,
            volatility_impact: 1.0,
            market_impact_factor: 0.001,
            min_latency_ms: 1,
            max_latency_ms: 10,
            partial_fill_probability: 0.3,
            commission_per_share: 0.005,
            commission_percentage: 0.0,
            minimum_commission: 1.0,
            respect_market_hours: false,
            session_open_minute: 9 * 60 + 30,
            session_close_minute: 16 * 60,
            synthetic_spreads: false,
            seed: 0,
        }
    }
}

/// Last observed market snapshot for one symbol.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarketState {
    pub symbol: Symbol,
    pub bid_price: f64,
    pub ask_price: f64,
    pub last_price: f64,
    pub bid_volume: u64,
    pub ask_volume: u64,
    pub spread: f64,
    pub volatility: f64,
    pub timestamp_ns: u64,
}

impl MarketState {
    fn spread_bps(&self) -> f64 {
        let mid = (self.bid_price + self.ask_price) / 2.0;
        if mid > 0.0 {
            self.spread / mid * 10_000.0
        } else {
            0.0
        }
    }
}

struct PendingOrder {
    order_id: u64,
    symbol: Symbol,
    action: SignalAction,
    order_type: OrderType,
    price: f64,
    quantity: u32,
    filled: u32,
    in_flight: u32,
    next_exec_seq: u32,
    submit_time_ns: u64,
    last_update_ns: u64,
}

impl PendingOrder {
    fn unscheduled_remaining(&self) -> u32 {
        self.quantity - self.filled - self.in_flight
    }
}

/// Snapshot of the order fields the pricing helpers read.
#[derive(Clone, Copy)]
struct OrderView {
    symbol: Symbol,
    action: SignalAction,
    order_type: OrderType,
    price: f64,
    remaining: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct FillEvent {
    fill_time_ns: u64,
    seq: u64,
    order_id: u64,
    fill_price: f64,
    fill_quantity: u32,
    expected_price: f64,
}

impl Eq for FillEvent {}

impl Ord for FillEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fill_time_ns, self.seq).cmp(&(other.fill_time_ns, other.seq))
    }
}

impl PartialOrd for FillEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Running totals, conserved across every emitted execution.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SimStats {
    pub total_fills: u64,
    pub partial_fills: u64,
    pub cancellations: u64,
    pub total_commission: f64,
    /// Sum of `fill_price * fill_quantity` over all fills.
    pub total_notional: f64,
    /// Sum of per-fill fractional slippage against the expected price.
    pub total_slippage: f64,
}

impl SimStats {
    pub fn average_slippage(&self) -> f64 {
        if self.total_fills > 0 {
            self.total_slippage / self.total_fills as f64
        } else {
            0.0
        }
    }
}

pub struct FillSimulator {
    config: FillConfig,
    clock: Arc<common::Clock>,
    states: FxHashMap<Symbol, MarketState>,
    pending: FxHashMap<u64, PendingOrder>,
    queue: BinaryHeap<Reverse<FillEvent>>,
    ready: Vec<OrderExecution>,
    rng: StdRng,
    event_seq: u64,
    stats: Arc<Mutex<SimStats>>,
}

impl FillSimulator {
    pub fn new(config: FillConfig, clock: Arc<common::Clock>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            clock,
            states: FxHashMap::default(),
            pending: FxHashMap::default(),
            queue: BinaryHeap::new(),
            ready: Vec::new(),
            event_seq: 0,
            stats: Arc::new(Mutex::new(SimStats::default())),
        }
    }

    pub fn stats(&self) -> SimStats {
        *self.stats.lock()
    }

    /// Handle that stays readable after the simulator moves into the
    /// gateway as its execution backend.
    pub fn stats_handle(&self) -> Arc<Mutex<SimStats>> {
        Arc::clone(&self.stats)
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.len()
    }

    pub fn market_state(&self, symbol: &Symbol) -> Option<&MarketState> {
        self.states.get(symbol)
    }

    pub fn set_volatility(&mut self, symbol: Symbol, volatility: f64) {
        self.states.entry(symbol).or_default().volatility = volatility;
    }

    /// Fold in a tick and re-check every resting order on the symbol.
    pub fn update_market_state(&mut self, tick: &MarketData) {
        let state = self.states.entry(tick.symbol).or_default();
        let old_price = state.last_price;

        state.symbol = tick.symbol;
        state.bid_price = tick.bid_price;
        state.ask_price = tick.ask_price;
        state.last_price = tick.last_price;
        state.bid_volume = u64::from(tick.bid_size);
        state.ask_volume = u64::from(tick.ask_size);
        state.spread = tick.ask_price - tick.bid_price;
        state.timestamp_ns = tick.exchange_timestamp;

        if old_price > 0.0 && state.last_price > 0.0 {
            let change = ((state.last_price - old_price) / old_price).abs();
            state.volatility = VOL_EMA_ALPHA * change + (1.0 - VOL_EMA_ALPHA) * state.volatility;
        }

        if self.config.synthetic_spreads && state.last_price > 0.0 {
            let spread = synthetic_spread(&mut self.rng, state.last_price);
            state.spread = spread;
            state.bid_price = state.last_price - spread / 2.0;
            state.ask_price = state.last_price + spread / 2.0;
        }

        let symbol = tick.symbol;
        let ids: Vec<u64> = self
            .pending
            .values()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.order_id)
            .collect();
        for id in ids {
            self.try_schedule(id);
        }
    }

    /// Accept an order. Orders with no market state rest until a tick
    /// arrives for their symbol.
    pub fn submit_order(&mut self, order_id: u64, signal: &TradingSignal) {
        let now = self.clock.now_ns();
        self.pending.insert(
            order_id,
            PendingOrder {
                order_id,
                symbol: signal.symbol,
                action: signal.action,
                order_type: signal.order_type,
                price: signal.price,
                quantity: signal.quantity,
                filled: 0,
                in_flight: 0,
                next_exec_seq: 0,
                submit_time_ns: now,
                last_update_ns: now,
            },
        );
        debug!(
            order_id,
            symbol = %signal.symbol,
            action = ?signal.action,
            quantity = signal.quantity,
            price = signal.price,
            "order accepted by simulator"
        );
        self.try_schedule(order_id);
    }

    /// Cancel a resting order. Emits a CANCELLED execution for whatever
    /// had not filled.
    pub fn cancel_order(&mut self, order_id: u64) -> bool {
        let Some(order) = self.pending.remove(&order_id) else {
            return false;
        };
        self.stats.lock().cancellations += 1;
        self.ready.push(OrderExecution {
            order_id,
            symbol: order.symbol,
            exec_type: ExecutionType::Cancelled,
            side: order.action,
            exec_seq: order.next_exec_seq + 1,
            fill_price: 0.0,
            fill_quantity: 0,
            remaining_quantity: order.quantity - order.filled,
            commission: 0.0,
        });
        debug!(order_id, "order cancelled");
        true
    }

    /// Drain due fill events into executions and re-check resting orders.
    pub fn process_pending_fills(&mut self) -> Vec<OrderExecution> {
        let now = self.clock.now_ns();

        while self
            .queue
            .peek()
            .is_some_and(|next| next.0.fill_time_ns <= now)
        {
            let Some(Reverse(event)) = self.queue.pop() else {
                break;
            };
            self.apply_event(&event, now);
        }

        // Orders that became eligible since their symbol's last tick.
        let ids: Vec<u64> = self.pending.keys().copied().collect();
        for id in ids {
            self.try_schedule(id);
        }

        std::mem::take(&mut self.ready)
    }

    fn apply_event(&mut self, event: &FillEvent, now: u64) {
        let Some(order) = self.pending.get_mut(&event.order_id) else {
            return;
        };
        order.in_flight = order.in_flight.saturating_sub(event.fill_quantity);
        let remaining = order.quantity - order.filled;
        let quantity = event.fill_quantity.min(remaining);
        if quantity == 0 {
            return;
        }
        let remaining_after = remaining - quantity;
        let exec_type = if remaining_after == 0 {
            ExecutionType::Fill
        } else {
            ExecutionType::PartialFill
        };
        let since_submit_ns = now.saturating_sub(order.submit_time_ns);
        let since_update_ns = now.saturating_sub(order.last_update_ns);
        order.filled += quantity;
        order.last_update_ns = now;
        order.next_exec_seq += 1;

        let commission = self.config.commission(event.fill_price, quantity);
        let execution = OrderExecution {
            order_id: order.order_id,
            symbol: order.symbol,
            exec_type,
            side: order.action,
            exec_seq: order.next_exec_seq,
            fill_price: event.fill_price,
            fill_quantity: quantity,
            remaining_quantity: remaining_after,
            commission,
        };

        {
            let mut stats = self.stats.lock();
            stats.total_fills += 1;
            if exec_type == ExecutionType::PartialFill {
                stats.partial_fills += 1;
            }
            stats.total_commission += commission;
            stats.total_notional += event.fill_price * f64::from(quantity);
            if event.expected_price > 0.0 {
                stats.total_slippage +=
                    (event.fill_price - event.expected_price).abs() / event.expected_price;
            }
        }

        trace!(
            order_id = execution.order_id,
            ?exec_type,
            quantity,
            price = event.fill_price,
            since_submit_ns,
            since_update_ns,
            "fill applied"
        );
        if execution.exec_type == ExecutionType::Fill {
            self.pending.remove(&execution.order_id);
        }
        self.ready.push(execution);
    }

    /// Schedule at most one new fill event for the order if it is
    /// currently eligible.
    fn try_schedule(&mut self, order_id: u64) {
        // Copy what the pricing helpers need so the pending map borrow
        // ends before they run.
        let order = {
            let Some(order) = self.pending.get(&order_id) else {
                return;
            };
            OrderView {
                action: order.action,
                order_type: order.order_type,
                price: order.price,
                remaining: order.unscheduled_remaining(),
                symbol: order.symbol,
            }
        };
        if order.remaining == 0 {
            return;
        }
        let Some(state) = self.states.get(&order.symbol).copied() else {
            return;
        };
        if state.bid_price <= 0.0 && state.ask_price <= 0.0 {
            return;
        }

        let now = self.clock.now_ns();
        if self.config.respect_market_hours && !self.config.in_session(now) {
            return;
        }

        let eligible = match order.order_type {
            OrderType::Market => true,
            OrderType::Limit => match order.action {
                SignalAction::Buy => order.price >= state.ask_price,
                SignalAction::Sell => order.price <= state.bid_price,
                _ => false,
            },
            // Stop orders rest until converted upstream.
            OrderType::Stop | OrderType::StopLimit => false,
        };
        if !eligible {
            return;
        }

        let quantity = self.fill_quantity(&order, &state);
        if quantity == 0 {
            return;
        }
        let (fill_price, expected_price) = self.fill_price(&order, &state, quantity);
        let latency_ms = self.latency_ms();
        self.event_seq += 1;
        let event = FillEvent {
            fill_time_ns: now + latency_ms * 1_000_000,
            seq: self.event_seq,
            order_id,
            fill_price,
            fill_quantity: quantity,
            expected_price,
        };
        self.queue.push(Reverse(event));
        if let Some(order) = self.pending.get_mut(&order_id) {
            order.in_flight += quantity;
        }
        trace!(
            order_id,
            quantity,
            fill_price,
            latency_ms,
            "fill scheduled"
        );
    }

    fn latency_ms(&mut self) -> u64 {
        if self.config.model == FillModel::Immediate {
            return 0;
        }
        if self.config.max_latency_ms <= self.config.min_latency_ms {
            return self.config.min_latency_ms;
        }
        self.rng
            .gen_range(self.config.min_latency_ms..=self.config.max_latency_ms)
    }

    fn fill_quantity(&mut self, order: &OrderView, state: &MarketState) -> u32 {
        let remaining = order.remaining;
        match self.config.model {
            FillModel::Immediate | FillModel::RealisticSlippage => remaining,
            FillModel::PartialFills => {
                if self.rng.r#gen::<f64>() < self.config.partial_fill_probability {
                    let ratio = self.rng.gen_range(0.2..0.8);
                    ((f64::from(remaining) * ratio) as u32).max(1)
                } else {
                    liquidity_cap(order, state, remaining)
                }
            }
            FillModel::MarketImpact | FillModel::LatencyAware => {
                liquidity_cap(order, state, remaining)
            }
        }
    }

    fn fill_price(&mut self, order: &OrderView, state: &MarketState, quantity: u32) -> (f64, f64) {
        let base = match order.order_type {
            OrderType::Market => match order.action {
                SignalAction::Sell => state.bid_price,
                _ => state.ask_price,
            },
            _ => order.price,
        };

        let slippage = match self.config.model {
            FillModel::Immediate => 0.0,
            FillModel::RealisticSlippage => self.slippage(state),
            FillModel::MarketImpact => self.impact(state, quantity),
            FillModel::LatencyAware | FillModel::PartialFills => {
                self.slippage(state) + self.impact(state, quantity)
            }
        };

        let price = match order.action {
            SignalAction::Sell => base * (1.0 - slippage),
            _ => base * (1.0 + slippage),
        };
        (price, base)
    }

    fn slippage(&mut self, state: &MarketState) -> f64 {
        let vol_term =
            self.config.slippage_factor * (1.0 + state.volatility * self.config.volatility_impact);
        let spread_term = state.spread_bps() / 10_000.0 / 2.0 * self.rng.gen_range(0.5..1.5);
        vol_term + spread_term
    }

    fn impact(&self, state: &MarketState, quantity: u32) -> f64 {
        let avg_volume = ((state.bid_volume + state.ask_volume) / 2).max(1);
        self.config.market_impact_factor * f64::from(quantity) / avg_volume as f64
    }
}

impl FillConfig {
    fn commission(&self, price: f64, quantity: u32) -> f64 {
        let commission = self.commission_per_share * f64::from(quantity)
            + self.commission_percentage * price * f64::from(quantity);
        commission.max(self.minimum_commission)
    }

    fn in_session(&self, now_ns: u64) -> bool {
        let Some(utc) = chrono::DateTime::from_timestamp((now_ns / 1_000_000_000) as i64, 0) else {
            return false;
        };
        let minutes_utc = utc.hour() * 60 + utc.minute();
        // ET is UTC-5 here; DST is deliberately not modeled.
        let minutes_et = (minutes_utc + 24 * 60 - 5 * 60) % (24 * 60);
        minutes_et >= self.session_open_minute && minutes_et <= self.session_close_minute
    }
}

fn liquidity_cap(order: &OrderView, state: &MarketState, remaining: u32) -> u32 {
    let available = match order.action {
        SignalAction::Sell => state.bid_volume,
        _ => state.ask_volume,
    };
    if available == 0 {
        remaining
    } else {
        remaining.min(available.min(u64::from(u32::MAX)) as u32)
    }
}

fn synthetic_spread(rng: &mut StdRng, price: f64) -> f64 {
    let spread_bps = if price < 5.0 {
        20.0
    } else if price < 50.0 {
        5.0
    } else if price < 200.0 {
        2.0
    } else {
        1.0
    };
    price * spread_bps * rng.gen_range(0.5..2.0) / 10_000.0
}

/// The simulator is the gateway's paper backend.
impl ExecutionBackend for FillSimulator {
    fn submit_order(&mut self, order_id: u64, signal: &TradingSignal) {
        FillSimulator::submit_order(self, order_id, signal);
    }

    fn cancel_order(&mut self, order_id: u64) -> bool {
        FillSimulator::cancel_order(self, order_id)
    }

    fn on_market_data(&mut self, tick: &MarketData) {
        self.update_market_state(tick);
    }

    fn poll_executions(&mut self) -> Vec<OrderExecution> {
        self.process_pending_fills()
    }

    fn name(&self) -> &str {
        "fill-simulator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Clock;

    fn tick(symbol: &str, bid: f64, ask: f64, bid_size: u32, ask_size: u32) -> MarketData {
        MarketData {
            symbol: Symbol::new(symbol),
            bid_price: bid,
            ask_price: ask,
            bid_size,
            ask_size,
            last_price: (bid + ask) / 2.0,
            last_size: 100,
            exchange_timestamp: 1_700_000_000_000_000_000,
        }
    }

    fn buy_market(qty: u32) -> TradingSignal {
        TradingSignal {
            symbol: Symbol::new("AAPL"),
            action: SignalAction::Buy,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: qty,
            strategy_id: 1,
            confidence: 1.0,
        }
    }

    fn simulator(model: FillModel) -> FillSimulator {
        FillSimulator::new(
            FillConfig {
                model,
                min_latency_ms: 0,
                max_latency_ms: 0,
                seed: 42,
                ..FillConfig::default()
            },
            Arc::new(Clock::for_tests()),
        )
    }

    fn drain_until_done(sim: &mut FillSimulator, max_rounds: usize) -> Vec<OrderExecution> {
        let mut all = Vec::new();
        for _ in 0..max_rounds {
            all.extend(sim.process_pending_fills());
            if sim.pending_orders() == 0 {
                break;
            }
        }
        all
    }

    #[test]
    fn immediate_buy_fills_at_the_ask() {
        let mut sim = simulator(FillModel::Immediate);
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 500, 500));
        sim.submit_order(1, &buy_market(100));

        let executions = drain_until_done(&mut sim, 3);
        assert_eq!(executions.len(), 1);
        let exec = &executions[0];
        assert_eq!(exec.exec_type, ExecutionType::Fill);
        assert_eq!(exec.fill_price, 100.01);
        assert_eq!(exec.fill_quantity, 100);
        assert_eq!(exec.remaining_quantity, 0);
        let expected_commission = (0.005f64 * 100.0 + 0.0 * 100.01 * 100.0).max(1.0);
        assert_eq!(exec.commission, expected_commission);
        assert_eq!(sim.pending_orders(), 0);
    }

    #[test]
    fn order_without_market_state_is_held() {
        let mut sim = simulator(FillModel::Immediate);
        sim.submit_order(1, &buy_market(100));
        assert!(drain_until_done(&mut sim, 2).is_empty());
        assert_eq!(sim.pending_orders(), 1);

        // Market data arrives later; the order fills.
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 500, 500));
        let executions = drain_until_done(&mut sim, 3);
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].exec_type, ExecutionType::Fill);
    }

    #[test]
    fn partial_fills_sum_to_total_and_terminate_with_fill() {
        let mut sim = FillSimulator::new(
            FillConfig {
                model: FillModel::PartialFills,
                partial_fill_probability: 1.0,
                min_latency_ms: 0,
                max_latency_ms: 0,
                seed: 7,
                ..FillConfig::default()
            },
            Arc::new(Clock::for_tests()),
        );
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 400, 400));
        sim.submit_order(1, &buy_market(1000));

        let executions = drain_until_done(&mut sim, 200);
        assert!(executions.len() > 1, "expected a partial sequence");

        let total: u64 = executions.iter().map(|e| u64::from(e.fill_quantity)).sum();
        assert_eq!(total, 1000, "fills must conserve quantity");

        for exec in &executions[..executions.len() - 1] {
            assert_eq!(exec.exec_type, ExecutionType::PartialFill);
        }
        let last = executions.last().unwrap();
        assert_eq!(last.exec_type, ExecutionType::Fill);
        assert_eq!(last.remaining_quantity, 0);

        // Exec sequences are strictly increasing per order.
        for pair in executions.windows(2) {
            assert!(pair[1].exec_seq > pair[0].exec_seq);
        }
    }

    #[test]
    fn limit_order_waits_for_its_price() {
        let mut sim = simulator(FillModel::Immediate);
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 500, 500));
        let signal = TradingSignal {
            order_type: OrderType::Limit,
            price: 99.50,
            ..buy_market(100)
        };
        sim.submit_order(1, &signal);
        assert!(drain_until_done(&mut sim, 2).is_empty());

        // Ask drops through the limit: now it fills, at the limit price.
        sim.update_market_state(&tick("AAPL", 99.40, 99.45, 500, 500));
        let executions = drain_until_done(&mut sim, 3);
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].fill_price, 99.50);
    }

    #[test]
    fn sell_slippage_hits_down() {
        let mut sim = FillSimulator::new(
            FillConfig {
                model: FillModel::RealisticSlippage,
                min_latency_ms: 0,
                max_latency_ms: 0,
                seed: 3,
                ..FillConfig::default()
            },
            Arc::new(Clock::for_tests()),
        );
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 500, 500));
        let mut signal = buy_market(100);
        signal.action = SignalAction::Sell;
        sim.submit_order(1, &signal);

        let executions = drain_until_done(&mut sim, 3);
        assert_eq!(executions.len(), 1);
        assert!(
            executions[0].fill_price < 99.99,
            "sell must fill below the bid under slippage"
        );
    }

    #[test]
    fn market_impact_caps_at_liquidity() {
        let mut sim = simulator(FillModel::MarketImpact);
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 400, 400));
        sim.submit_order(1, &buy_market(1000));

        let executions = drain_until_done(&mut sim, 10);
        assert!(executions.len() >= 2);
        assert_eq!(executions[0].fill_quantity, 400);
        assert_eq!(executions[0].exec_type, ExecutionType::PartialFill);
        let total: u64 = executions.iter().map(|e| u64::from(e.fill_quantity)).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn cancellation_reports_unfilled_remainder() {
        let mut sim = simulator(FillModel::Immediate);
        sim.submit_order(1, &buy_market(100));
        assert!(sim.cancel_order(1));
        assert!(!sim.cancel_order(1));

        let executions = sim.process_pending_fills();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].exec_type, ExecutionType::Cancelled);
        assert_eq!(executions[0].remaining_quantity, 100);
        assert_eq!(sim.stats().cancellations, 1);
    }

    #[test]
    fn stats_conserve_commission_and_notional() {
        let mut sim = FillSimulator::new(
            FillConfig {
                model: FillModel::PartialFills,
                partial_fill_probability: 1.0,
                min_latency_ms: 0,
                max_latency_ms: 0,
                seed: 11,
                ..FillConfig::default()
            },
            Arc::new(Clock::for_tests()),
        );
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 400, 400));
        sim.submit_order(1, &buy_market(500));
        let executions = drain_until_done(&mut sim, 100);

        let commission: f64 = executions.iter().map(|e| e.commission).sum();
        let notional: f64 = executions
            .iter()
            .map(|e| e.fill_price * f64::from(e.fill_quantity))
            .sum();
        let stats = sim.stats();
        assert!((stats.total_commission - commission).abs() < 1e-9);
        assert!((stats.total_notional - notional).abs() < 1e-9);
        assert_eq!(stats.total_fills, executions.len() as u64);
    }

    #[test]
    fn market_hours_gate_holds_scheduling() {
        let mut sim = FillSimulator::new(
            FillConfig {
                model: FillModel::Immediate,
                respect_market_hours: true,
                // Inverted session window: nothing is ever in-session.
                session_open_minute: 1,
                session_close_minute: 0,
                ..FillConfig::default()
            },
            Arc::new(Clock::for_tests()),
        );
        sim.update_market_state(&tick("AAPL", 99.99, 100.01, 500, 500));
        sim.submit_order(1, &buy_market(100));
        assert!(drain_until_done(&mut sim, 2).is_empty());
        assert_eq!(sim.pending_orders(), 1);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let run = |seed: u64| {
            let mut sim = FillSimulator::new(
                FillConfig {
                    model: FillModel::PartialFills,
                    partial_fill_probability: 1.0,
                    min_latency_ms: 0,
                    max_latency_ms: 0,
                    seed,
                    ..FillConfig::default()
                },
                Arc::new(Clock::for_tests()),
            );
            sim.update_market_state(&tick("AAPL", 99.99, 100.01, 400, 400));
            sim.submit_order(1, &buy_market(1000));
            drain_until_done(&mut sim, 100)
                .iter()
                .map(|e| e.fill_quantity)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
        assert_ne!(run(5), run(6));
    }
}
