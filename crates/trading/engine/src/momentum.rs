//! Reference momentum strategy

use common::{MarketData, OrderType, SignalAction, Symbol, TradingSignal};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::strategy::{Strategy, StrategyCtx};

#[derive(Clone, Copy, Debug)]
pub struct MomentumConfig {
    /// Fractional mid-price move that triggers a signal.
    pub threshold: f64,
    /// Minimum gap between signals per symbol.
    pub min_signal_interval_ms: u64,
    /// Shares per signal.
    pub order_quantity: u32,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            min_signal_interval_ms: 1000,
            order_quantity: 100,
        }
    }
}

struct SymbolState {
    last_mid: f64,
    last_signal_ns: u64,
}

/// Buys strength and sells weakness: a signal fires when the mid moves
/// more than `threshold` since the previous tick and the per-symbol
/// cooldown has elapsed.
pub struct MomentumStrategy {
    id: u64,
    config: MomentumConfig,
    state: FxHashMap<Symbol, SymbolState>,
}

impl MomentumStrategy {
    pub fn new(id: u64, config: MomentumConfig) -> Self {
        Self {
            id,
            config,
            state: FxHashMap::default(),
        }
    }
}

impl Strategy for MomentumStrategy {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        "momentum"
    }

    fn on_market_data(&mut self, tick: &MarketData, ctx: &StrategyCtx) {
        let mid = tick.mid_price();
        if mid <= 0.0 {
            return;
        }
        let now_ns = ctx.now_ns();

        let Some(state) = self.state.get_mut(&tick.symbol) else {
            self.state.insert(
                tick.symbol,
                SymbolState {
                    last_mid: mid,
                    last_signal_ns: 0,
                },
            );
            return;
        };

        let change = (mid - state.last_mid) / state.last_mid;
        state.last_mid = mid;

        if change.abs() <= self.config.threshold {
            return;
        }
        let elapsed_ms = now_ns.saturating_sub(state.last_signal_ns) / 1_000_000;
        if state.last_signal_ns != 0 && elapsed_ms < self.config.min_signal_interval_ms {
            return;
        }

        let action = if change > 0.0 {
            SignalAction::Buy
        } else {
            SignalAction::Sell
        };
        let signal = TradingSignal {
            symbol: tick.symbol,
            action,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: self.config.order_quantity,
            strategy_id: self.id,
            confidence: (change.abs() / self.config.threshold).min(1.0),
        };
        if ctx.submit(&signal) {
            state.last_signal_ns = now_ns;
            debug!(
                symbol = %tick.symbol,
                change_pct = change * 100.0,
                ?action,
                "momentum signal"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::capture_sink;

    fn tick(symbol: &str, bid: f64, ask: f64) -> MarketData {
        MarketData {
            symbol: Symbol::new(symbol),
            bid_price: bid,
            ask_price: ask,
            bid_size: 100,
            ask_size: 100,
            last_price: (bid + ask) / 2.0,
            last_size: 10,
            exchange_timestamp: 0,
        }
    }

    #[test]
    fn threshold_crossing_emits_one_full_confidence_buy() {
        let (sink, mut drain) = capture_sink("momentum-threshold-cross");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = MomentumStrategy::new(
            1001,
            MomentumConfig {
                threshold: 0.001,
                min_signal_interval_ms: 60_000,
                order_quantity: 100,
            },
        );

        // First tick seeds the reference mid at 100.00.
        strategy.on_market_data(&tick("AAPL", 99.95, 100.05), &ctx);
        // Mid jumps to 100.20: +0.2% >> threshold.
        strategy.on_market_data(&tick("AAPL", 100.15, 100.25), &ctx);
        // Another jump inside the cooldown must not signal again.
        strategy.on_market_data(&tick("AAPL", 100.35, 100.45), &ctx);

        let signals = drain();
        assert_eq!(signals.len(), 1, "exactly one signal expected");
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[0].confidence, 1.0);
        assert_eq!(signals[0].quantity, 100);
        assert_eq!(signals[0].strategy_id, 1001);
    }

    #[test]
    fn downward_move_sells() {
        let (sink, mut drain) = capture_sink("momentum-down");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = MomentumStrategy::new(1, MomentumConfig::default());

        strategy.on_market_data(&tick("MSFT", 399.9, 400.1), &ctx);
        strategy.on_market_data(&tick("MSFT", 398.9, 399.1), &ctx);

        let signals = drain();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].action, SignalAction::Sell);
    }

    #[test]
    fn sub_threshold_moves_are_silent() {
        let (sink, mut drain) = capture_sink("momentum-quiet");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = MomentumStrategy::new(1, MomentumConfig::default());

        strategy.on_market_data(&tick("SPY", 499.95, 500.05), &ctx);
        for _ in 0..10 {
            // 0.002% moves, well under the 0.1% threshold.
            strategy.on_market_data(&tick("SPY", 499.96, 500.06), &ctx);
        }
        assert!(drain().is_empty());
    }

    #[test]
    fn symbols_are_independent() {
        let (sink, mut drain) = capture_sink("momentum-multi");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = MomentumStrategy::new(1, MomentumConfig::default());

        strategy.on_market_data(&tick("AAA", 9.99, 10.01), &ctx);
        strategy.on_market_data(&tick("BBB", 19.99, 20.01), &ctx);
        strategy.on_market_data(&tick("AAA", 10.09, 10.11), &ctx);
        strategy.on_market_data(&tick("BBB", 19.79, 19.81), &ctx);

        let signals = drain();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].symbol.as_str(), "AAA");
        assert_eq!(signals[0].action, SignalAction::Buy);
        assert_eq!(signals[1].symbol.as_str(), "BBB");
        assert_eq!(signals[1].action, SignalAction::Sell);
    }
}
