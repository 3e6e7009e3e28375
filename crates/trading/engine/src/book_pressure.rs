//! Order-book momentum extension strategy
//!
//! Rebuilds the L2 book from updates and trades on persistent top-of-book
//! imbalance: several consecutive observations beyond the threshold on
//! the same side trigger a market order in that direction.

use common::{MarketData, OrderBookUpdate, OrderType, SignalAction, Symbol, TradingSignal};
use lob::BookManager;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::strategy::{Strategy, StrategyCtx};

#[derive(Clone, Copy, Debug)]
pub struct BookPressureConfig {
    /// Absolute imbalance needed to count an observation.
    pub imbalance_threshold: f64,
    /// Consecutive observations on one side before a signal.
    pub persistence: u32,
    pub order_quantity: u32,
    /// Cooldown per symbol.
    pub min_signal_interval_ms: u64,
}

impl Default for BookPressureConfig {
    fn default() -> Self {
        Self {
            imbalance_threshold: 0.6,
            persistence: 3,
            order_quantity: 100,
            min_signal_interval_ms: 500,
        }
    }
}

#[derive(Default)]
struct SymbolState {
    streak_side: i8,
    streak: u32,
    last_signal_ns: u64,
}

pub struct BookPressureStrategy {
    id: u64,
    config: BookPressureConfig,
    books: BookManager,
    state: FxHashMap<Symbol, SymbolState>,
}

impl BookPressureStrategy {
    pub fn new(id: u64, config: BookPressureConfig) -> Self {
        Self {
            id,
            config,
            books: BookManager::new(),
            state: FxHashMap::default(),
        }
    }
}

impl Strategy for BookPressureStrategy {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        "book-pressure"
    }

    fn on_market_data(&mut self, _tick: &MarketData, _ctx: &StrategyCtx) {}

    fn on_book_update(&mut self, update: &OrderBookUpdate, ctx: &StrategyCtx) {
        if self.books.process_update(update).is_err() {
            return;
        }
        let Some(book) = self.books.book(&update.symbol) else {
            return;
        };
        if book.depth(common::BookSide::Bid) == 0 || book.depth(common::BookSide::Ask) == 0 {
            return;
        }

        let imbalance = book.bid_ask_imbalance();
        let side: i8 = if imbalance > self.config.imbalance_threshold {
            1
        } else if imbalance < -self.config.imbalance_threshold {
            -1
        } else {
            0
        };

        let state = self.state.entry(update.symbol).or_default();
        if side == 0 || side != state.streak_side {
            state.streak_side = side;
            state.streak = u32::from(side != 0);
            return;
        }
        state.streak += 1;
        if state.streak < self.config.persistence {
            return;
        }

        let now_ns = ctx.now_ns();
        let elapsed_ms = now_ns.saturating_sub(state.last_signal_ns) / 1_000_000;
        if state.last_signal_ns != 0 && elapsed_ms < self.config.min_signal_interval_ms {
            return;
        }

        let action = if side > 0 {
            SignalAction::Buy
        } else {
            SignalAction::Sell
        };
        let signal = TradingSignal {
            symbol: update.symbol,
            action,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: self.config.order_quantity,
            strategy_id: self.id,
            confidence: imbalance.abs().min(1.0),
        };
        if ctx.submit(&signal) {
            state.last_signal_ns = now_ns;
            state.streak = 0;
            trace!(symbol = %update.symbol, imbalance, ?action, "book pressure signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::capture_sink;
    use common::{BookSide, BookUpdateType};

    fn update(seq: u64, side: BookSide, price: f64, size: u32) -> OrderBookUpdate {
        OrderBookUpdate {
            symbol: Symbol::new("FUT"),
            update_type: BookUpdateType::Update,
            side,
            price,
            size,
            order_count: 1,
            sequence: seq,
            exchange_timestamp: seq,
        }
    }

    #[test]
    fn persistent_bid_pressure_buys() {
        let (sink, mut drain) = capture_sink("pressure-buy");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = BookPressureStrategy::new(3001, BookPressureConfig::default());

        strategy.on_book_update(&update(1, BookSide::Ask, 100.1, 100), &ctx);
        // Heavy bid: imbalance = (900 - 100) / 1000 = 0.8 on every update.
        for seq in 2..=5 {
            strategy.on_book_update(&update(seq, BookSide::Bid, 100.0, 900), &ctx);
        }

        let signals = drain();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert!(signals[0].confidence > 0.7);
    }

    #[test]
    fn balanced_book_stays_quiet() {
        let (sink, mut drain) = capture_sink("pressure-quiet");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = BookPressureStrategy::new(3001, BookPressureConfig::default());

        strategy.on_book_update(&update(1, BookSide::Ask, 100.1, 500), &ctx);
        for seq in 2..=10 {
            strategy.on_book_update(&update(seq, BookSide::Bid, 100.0, 500), &ctx);
        }
        assert!(drain().is_empty());
    }
}
