//! Signed position tracking with cost-basis accounting

use common::{OrderExecution, PositionUpdate, SignalAction, Symbol};
use rustc_hash::FxHashMap;
use tracing::trace;

/// One symbol's position. Average price is 0 exactly when the quantity
/// is 0; additions weight the average by fill price, reductions realize
/// P&L at the prevailing average, and crossing through zero resets the
/// average to the crossing fill's price.
#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: i64,
    pub average_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub last_price: f64,
}

impl Position {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            ..Self::default()
        }
    }

    /// Apply a signed fill. Returns the realized P&L delta.
    pub fn apply_fill(&mut self, side: SignalAction, quantity: u32, price: f64) -> f64 {
        let signed_qty = match side {
            SignalAction::Buy => i64::from(quantity),
            SignalAction::Sell => -i64::from(quantity),
            _ => return 0.0,
        };
        let old_qty = self.quantity;
        let new_qty = old_qty + signed_qty;
        let mut realized = 0.0;

        if old_qty == 0 {
            self.average_price = price;
        } else if old_qty.signum() == signed_qty.signum() {
            // Adding to the position: weight the average by fill price.
            let old_cost = self.average_price * old_qty.abs() as f64;
            let add_cost = price * signed_qty.abs() as f64;
            self.average_price = (old_cost + add_cost) / new_qty.abs() as f64;
        } else {
            // Reducing (or flipping): realize against the average.
            let closed = old_qty.abs().min(signed_qty.abs());
            realized = if old_qty > 0 {
                (price - self.average_price) * closed as f64
            } else {
                (self.average_price - price) * closed as f64
            };
            self.realized_pnl += realized;
            if new_qty == 0 {
                self.average_price = 0.0;
            } else if new_qty.signum() != old_qty.signum() {
                // Crossed through zero: the residual opens at this fill.
                self.average_price = price;
            }
        }

        self.quantity = new_qty;
        self.refresh_unrealized();
        realized
    }

    /// Update the mark and recompute unrealized P&L.
    pub fn mark(&mut self, last_price: f64) {
        self.last_price = last_price;
        self.refresh_unrealized();
    }

    fn refresh_unrealized(&mut self) {
        self.unrealized_pnl = if self.quantity != 0 && self.last_price > 0.0 {
            (self.last_price - self.average_price) * self.quantity as f64
        } else {
            0.0
        };
    }

    pub fn market_value(&self) -> f64 {
        self.last_price * self.quantity as f64
    }

    pub fn to_update(&self) -> PositionUpdate {
        PositionUpdate {
            symbol: self.symbol,
            position: self.quantity.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            average_price: self.average_price,
            unrealized_pnl: self.unrealized_pnl,
            realized_pnl: self.realized_pnl,
            market_value: self.market_value(),
        }
    }
}

/// All positions for one service, created lazily on first fill.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: FxHashMap<Symbol, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in an execution report. Only fills move positions. Returns the
    /// updated position when anything changed.
    pub fn apply_execution(&mut self, execution: &OrderExecution) -> Option<Position> {
        if execution.fill_quantity == 0 {
            return None;
        }
        match execution.exec_type {
            common::ExecutionType::Fill | common::ExecutionType::PartialFill => {}
            _ => return None,
        }
        let position = self
            .positions
            .entry(execution.symbol)
            .or_insert_with(|| Position::new(execution.symbol));
        let realized = position.apply_fill(
            execution.side,
            execution.fill_quantity,
            execution.fill_price,
        );
        trace!(
            symbol = %execution.symbol,
            quantity = position.quantity,
            avg = position.average_price,
            realized,
            "position updated"
        );
        Some(*position)
    }

    /// Mark a symbol and return the refreshed position, if held.
    pub fn mark(&mut self, symbol: &Symbol, last_price: f64) -> Option<Position> {
        let position = self.positions.get_mut(symbol)?;
        position.mark(last_price);
        Some(*position)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn total_realized(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn total_unrealized(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| p.quantity != 0).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}
