//! Statistical arbitrage extension strategy
//!
//! Trades the ratio between two co-moving symbols: when the ratio's
//! z-score against its rolling window stretches past the threshold, the
//! rich leg is sold and the cheap leg bought. Signals per pair are
//! cooldown-limited like every other strategy here.

use common::{MarketData, OrderType, SignalAction, Symbol, TradingSignal};
use std::collections::VecDeque;
use tracing::debug;

use crate::strategy::{Strategy, StrategyCtx};

#[derive(Clone, Debug)]
pub struct PairsConfig {
    pub symbol_a: Symbol,
    pub symbol_b: Symbol,
    /// Rolling window length for the ratio statistics.
    pub lookback: usize,
    /// Z-score that arms a divergence trade.
    pub zscore_threshold: f64,
    pub order_quantity: u32,
    pub min_signal_interval_ms: u64,
}

impl PairsConfig {
    pub fn new(symbol_a: impl Into<Symbol>, symbol_b: impl Into<Symbol>) -> Self {
        Self {
            symbol_a: symbol_a.into(),
            symbol_b: symbol_b.into(),
            lookback: 120,
            zscore_threshold: 2.0,
            order_quantity: 100,
            min_signal_interval_ms: 1000,
        }
    }
}

pub struct PairsStrategy {
    id: u64,
    config: PairsConfig,
    last_a: f64,
    last_b: f64,
    ratios: VecDeque<f64>,
    last_signal_ns: u64,
}

impl PairsStrategy {
    pub fn new(id: u64, config: PairsConfig) -> Self {
        Self {
            id,
            config,
            last_a: 0.0,
            last_b: 0.0,
            ratios: VecDeque::new(),
            last_signal_ns: 0,
        }
    }

    fn zscore(&self, ratio: f64) -> Option<f64> {
        // Both the mean and deviation need a reasonably full window.
        if self.ratios.len() < self.config.lookback / 2 {
            return None;
        }
        let n = self.ratios.len() as f64;
        let mean = self.ratios.iter().sum::<f64>() / n;
        let variance = self
            .ratios
            .iter()
            .map(|r| (r - mean) * (r - mean))
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();
        if std_dev <= f64::EPSILON {
            return None;
        }
        Some((ratio - mean) / std_dev)
    }

    fn leg(&self, symbol: Symbol, action: SignalAction, confidence: f64) -> TradingSignal {
        TradingSignal {
            symbol,
            action,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: self.config.order_quantity,
            strategy_id: self.id,
            confidence,
        }
    }
}

impl Strategy for PairsStrategy {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        "pairs"
    }

    fn on_market_data(&mut self, tick: &MarketData, ctx: &StrategyCtx) {
        let mid = tick.mid_price();
        if mid <= 0.0 {
            return;
        }
        if tick.symbol == self.config.symbol_a {
            self.last_a = mid;
        } else if tick.symbol == self.config.symbol_b {
            self.last_b = mid;
        } else {
            return;
        }
        if self.last_a <= 0.0 || self.last_b <= 0.0 {
            return;
        }

        let ratio = self.last_a / self.last_b;
        let z = self.zscore(ratio);

        if self.ratios.len() == self.config.lookback {
            self.ratios.pop_front();
        }
        self.ratios.push_back(ratio);

        let Some(z) = z else { return };
        if z.abs() < self.config.zscore_threshold {
            return;
        }
        let now_ns = ctx.now_ns();
        let elapsed_ms = now_ns.saturating_sub(self.last_signal_ns) / 1_000_000;
        if self.last_signal_ns != 0 && elapsed_ms < self.config.min_signal_interval_ms {
            return;
        }

        let confidence = (z.abs() / self.config.zscore_threshold).min(1.0);
        // Rich ratio: A is expensive relative to B. Sell A, buy B.
        let (action_a, action_b) = if z > 0.0 {
            (SignalAction::Sell, SignalAction::Buy)
        } else {
            (SignalAction::Buy, SignalAction::Sell)
        };
        let leg_a = self.leg(self.config.symbol_a, action_a, confidence);
        let leg_b = self.leg(self.config.symbol_b, action_b, confidence);
        if ctx.submit(&leg_a) && ctx.submit(&leg_b) {
            self.last_signal_ns = now_ns;
            debug!(
                pair = %format!("{}/{}", self.config.symbol_a, self.config.symbol_b),
                zscore = z,
                "divergence trade"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::capture_sink;

    fn tick(symbol: &str, mid: f64) -> MarketData {
        MarketData {
            symbol: Symbol::new(symbol),
            bid_price: mid - 0.01,
            ask_price: mid + 0.01,
            bid_size: 100,
            ask_size: 100,
            last_price: mid,
            last_size: 10,
            exchange_timestamp: 0,
        }
    }

    fn strategy() -> PairsStrategy {
        PairsStrategy::new(
            4001,
            PairsConfig {
                lookback: 20,
                zscore_threshold: 2.0,
                min_signal_interval_ms: 60_000,
                ..PairsConfig::new(Symbol::new("XLE"), Symbol::new("XOM"))
            },
        )
    }

    #[test]
    fn stable_ratio_stays_quiet() {
        let (sink, mut drain) = capture_sink("pairs-quiet");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = strategy();

        for i in 0..40 {
            // Tiny alternating wiggle keeps variance non-zero.
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&tick("XLE", 90.0 + wiggle), &ctx);
            strategy.on_market_data(&tick("XOM", 110.0), &ctx);
        }
        assert!(drain().is_empty());
    }

    #[test]
    fn divergence_sells_rich_leg_and_buys_cheap_leg() {
        let (sink, mut drain) = capture_sink("pairs-diverge");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = strategy();

        for i in 0..30 {
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&tick("XLE", 90.0 + wiggle), &ctx);
            strategy.on_market_data(&tick("XOM", 110.0), &ctx);
        }
        // A gaps up hard against B.
        strategy.on_market_data(&tick("XLE", 99.0), &ctx);

        let signals = drain();
        assert_eq!(signals.len(), 2, "both legs must fire together");
        assert_eq!(signals[0].symbol.as_str(), "XLE");
        assert_eq!(signals[0].action, SignalAction::Sell);
        assert_eq!(signals[1].symbol.as_str(), "XOM");
        assert_eq!(signals[1].action, SignalAction::Buy);
        assert_eq!(signals[0].confidence, 1.0);
    }

    #[test]
    fn cooldown_blocks_repeat_entries() {
        let (sink, mut drain) = capture_sink("pairs-cooldown");
        let ctx = StrategyCtx::new(sink);
        let mut strategy = strategy();

        for i in 0..30 {
            let wiggle = if i % 2 == 0 { 0.01 } else { -0.01 };
            strategy.on_market_data(&tick("XLE", 90.0 + wiggle), &ctx);
            strategy.on_market_data(&tick("XOM", 110.0), &ctx);
        }
        strategy.on_market_data(&tick("XLE", 99.0), &ctx);
        strategy.on_market_data(&tick("XLE", 99.5), &ctx);
        assert_eq!(drain().len(), 2, "second divergence sits inside the cooldown");
    }
}
