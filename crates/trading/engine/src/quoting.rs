//! Market-making extension strategy
//!
//! Keeps a two-sided quote around the mid. Refreshes are throttled per
//! symbol and each side is suppressed once the projected inventory would
//! leave the configured band; inventory is adjusted at submission time.

use common::{MarketData, OrderExecution, OrderType, SignalAction, Symbol, TradingSignal};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::strategy::{Strategy, StrategyCtx};

#[derive(Clone, Copy, Debug)]
pub struct QuotingConfig {
    /// Full quoted spread in basis points.
    pub spread_bps: f64,
    pub quote_size: u32,
    /// Absolute inventory bound in shares.
    pub max_inventory: i64,
    /// Minimum milliseconds between quote refreshes per symbol.
    pub refresh_interval_ms: u64,
}

impl Default for QuotingConfig {
    fn default() -> Self {
        Self {
            spread_bps: 10.0,
            quote_size: 100,
            max_inventory: 1000,
            refresh_interval_ms: 100,
        }
    }
}

#[derive(Default)]
struct SymbolState {
    last_quote_ns: u64,
    inventory: i64,
}

pub struct QuotingStrategy {
    id: u64,
    config: QuotingConfig,
    state: FxHashMap<Symbol, SymbolState>,
}

impl QuotingStrategy {
    pub fn new(id: u64, config: QuotingConfig) -> Self {
        Self {
            id,
            config: QuotingConfig {
                // The rate limit is a contract, not a suggestion.
                refresh_interval_ms: config.refresh_interval_ms.max(100),
                ..config
            },
            state: FxHashMap::default(),
        }
    }
}

impl Strategy for QuotingStrategy {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        "quoting"
    }

    fn on_market_data(&mut self, tick: &MarketData, ctx: &StrategyCtx) {
        let mid = tick.mid_price();
        if mid <= 0.0 {
            return;
        }
        let now_ns = ctx.now_ns();
        let id = self.id;
        let quote_size = self.config.quote_size;
        let state = self.state.entry(tick.symbol).or_default();
        let elapsed_ms = now_ns.saturating_sub(state.last_quote_ns) / 1_000_000;
        if state.last_quote_ns != 0 && elapsed_ms < self.config.refresh_interval_ms {
            return;
        }

        let half_spread = mid * self.config.spread_bps / 10_000.0 / 2.0;
        let size = i64::from(self.config.quote_size);
        let mut quoted = false;

        if state.inventory + size <= self.config.max_inventory {
            let bid = TradingSignal {
                symbol: tick.symbol,
                action: SignalAction::Buy,
                order_type: OrderType::Limit,
                price: mid - half_spread,
                quantity: quote_size,
                strategy_id: id,
                confidence: 0.5,
            };
            if ctx.submit(&bid) {
                state.inventory += size;
                quoted = true;
            }
        } else {
            trace!(symbol = %tick.symbol, inventory = state.inventory, "bid suppressed at inventory bound");
        }
        if state.inventory - size >= -self.config.max_inventory {
            let ask = TradingSignal {
                symbol: tick.symbol,
                action: SignalAction::Sell,
                order_type: OrderType::Limit,
                price: mid + half_spread,
                quantity: quote_size,
                strategy_id: id,
                confidence: 0.5,
            };
            if ctx.submit(&ask) {
                state.inventory -= size;
                quoted = true;
            }
        } else {
            trace!(symbol = %tick.symbol, inventory = state.inventory, "ask suppressed at inventory bound");
        }

        if quoted {
            state.last_quote_ns = now_ns;
        }
    }

    fn on_execution(&mut self, execution: &OrderExecution, _ctx: &StrategyCtx) {
        // Fills confirm exposure the submission path already reserved;
        // cancellations hand it back.
        if execution.exec_type == common::ExecutionType::Cancelled
            || execution.exec_type == common::ExecutionType::Rejected
        {
            if let Some(state) = self.state.get_mut(&execution.symbol) {
                let size = i64::from(execution.remaining_quantity);
                match execution.side {
                    SignalAction::Buy => state.inventory -= size,
                    SignalAction::Sell => state.inventory += size,
                    _ => {}
                }
            }
        }
    }
}
