//! Risk limit evaluation

use common::{RiskAlert, RiskLevel, SignalAction, TradingSignal};
use tracing::warn;

use crate::position::PositionBook;

#[derive(Clone, Copy, Debug)]
pub struct RiskLimits {
    /// Cap on `|position * last_price|` per symbol, in currency.
    pub max_position_value: f64,
    /// Daily loss floor: deny once `realized + unrealized < -max_daily_loss`.
    pub max_daily_loss: f64,
    /// Cap on `|quantity|` per symbol, in shares.
    pub position_limit_per_symbol: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_value: 100_000.0,
            max_daily_loss: 5_000.0,
            position_limit_per_symbol: 10_000,
        }
    }
}

/// Outcome of a pre-trade check. Acceptance is silent; denial carries the
/// alert that goes out on the logging bus.
#[derive(Clone, Debug)]
pub enum RiskDecision {
    Accept,
    Deny(RiskAlert),
}

impl RiskDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Evaluates signals against limits and the current position book.
#[derive(Debug, Default)]
pub struct RiskEngine {
    limits: RiskLimits,
    denials: u64,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits, denials: 0 }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn denials(&self) -> u64 {
        self.denials
    }

    /// Pre-trade evaluation of a signal against the book it would trade
    /// into. Uses the symbol's last mark for value projection; a symbol
    /// that has never been marked projects at the signal's limit price.
    pub fn evaluate(&mut self, signal: &TradingSignal, book: &PositionBook) -> RiskDecision {
        if !signal.action.is_order() {
            return RiskDecision::Accept;
        }
        let signed_qty = match signal.action {
            SignalAction::Buy => i64::from(signal.quantity),
            SignalAction::Sell => -i64::from(signal.quantity),
            _ => 0,
        };
        let current = book.get(&signal.symbol).copied().unwrap_or_default();
        let projected_qty = current.quantity + signed_qty;
        let mark = if current.last_price > 0.0 {
            current.last_price
        } else {
            signal.price
        };

        if projected_qty.abs() > self.limits.position_limit_per_symbol {
            return self.deny(
                signal,
                "position limit per symbol exceeded",
                self.limits.position_limit_per_symbol as f64,
                projected_qty.abs() as f64,
                RiskLevel::Warning,
            );
        }

        if mark > 0.0 {
            let projected_value = (projected_qty as f64 * mark).abs();
            if projected_value > self.limits.max_position_value {
                return self.deny(
                    signal,
                    "max position value exceeded",
                    self.limits.max_position_value,
                    projected_value,
                    RiskLevel::Warning,
                );
            }
        }

        let pnl = book.total_realized() + book.total_unrealized();
        if pnl < -self.limits.max_daily_loss {
            return self.deny(
                signal,
                "daily loss limit breached",
                -self.limits.max_daily_loss,
                pnl,
                RiskLevel::Critical,
            );
        }

        RiskDecision::Accept
    }

    fn deny(
        &mut self,
        signal: &TradingSignal,
        reason: &str,
        threshold: f64,
        current: f64,
        level: RiskLevel,
    ) -> RiskDecision {
        self.denials += 1;
        warn!(
            symbol = %signal.symbol,
            reason,
            threshold,
            current,
            "risk denial"
        );
        RiskDecision::Deny(RiskAlert {
            level,
            message: reason.to_string(),
            symbol: signal.symbol,
            threshold_value: threshold,
            current_value: current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderExecution, OrderType, Symbol};

    fn signal(action: SignalAction, qty: u32) -> TradingSignal {
        TradingSignal {
            symbol: Symbol::new("AAPL"),
            action,
            order_type: OrderType::Market,
            price: 0.0,
            quantity: qty,
            strategy_id: 1,
            confidence: 1.0,
        }
    }

    fn filled_book(qty: u32, price: f64) -> PositionBook {
        let mut book = PositionBook::new();
        book.apply_execution(&OrderExecution {
            order_id: 1,
            symbol: Symbol::new("AAPL"),
            exec_type: common::ExecutionType::Fill,
            side: SignalAction::Buy,
            exec_seq: 1,
            fill_price: price,
            fill_quantity: qty,
            remaining_quantity: 0,
            commission: 0.0,
        });
        book.mark(&Symbol::new("AAPL"), price);
        book
    }

    #[test]
    fn small_orders_pass_silently() {
        let mut risk = RiskEngine::new(RiskLimits::default());
        let book = filled_book(100, 10.0);
        assert!(risk.evaluate(&signal(SignalAction::Buy, 100), &book).is_accept());
        assert_eq!(risk.denials(), 0);
    }

    #[test]
    fn position_value_cap_denies() {
        let mut risk = RiskEngine::new(RiskLimits {
            max_position_value: 10_000.0,
            ..RiskLimits::default()
        });
        let book = filled_book(900, 10.0);
        // Projected: 1900 shares * $10 = $19k > $10k.
        let decision = risk.evaluate(&signal(SignalAction::Buy, 1000), &book);
        match decision {
            RiskDecision::Deny(alert) => {
                assert_eq!(alert.level, RiskLevel::Warning);
                assert_eq!(alert.threshold_value, 10_000.0);
            }
            RiskDecision::Accept => panic!("must deny"),
        }
    }

    #[test]
    fn share_limit_denies() {
        let mut risk = RiskEngine::new(RiskLimits {
            position_limit_per_symbol: 500,
            max_position_value: f64::MAX,
            ..RiskLimits::default()
        });
        let book = PositionBook::new();
        assert!(!risk.evaluate(&signal(SignalAction::Buy, 501), &book).is_accept());
        assert!(risk.evaluate(&signal(SignalAction::Sell, 500), &book).is_accept());
    }

    #[test]
    fn daily_loss_floor_denies_everything() {
        let mut risk = RiskEngine::new(RiskLimits {
            max_daily_loss: 1_000.0,
            ..RiskLimits::default()
        });
        let mut book = filled_book(1000, 10.0);
        // Mark down: unrealized = (8 - 10) * 1000 = -2000.
        book.mark(&Symbol::new("AAPL"), 8.0);
        let decision = risk.evaluate(&signal(SignalAction::Buy, 1), &book);
        match decision {
            RiskDecision::Deny(alert) => assert_eq!(alert.level, RiskLevel::Critical),
            RiskDecision::Accept => panic!("must deny after loss floor"),
        }
    }

    #[test]
    fn cancels_are_never_denied() {
        let mut risk = RiskEngine::new(RiskLimits {
            position_limit_per_symbol: 0,
            ..RiskLimits::default()
        });
        let book = PositionBook::new();
        assert!(risk.evaluate(&signal(SignalAction::Cancel, 1), &book).is_accept());
    }
}
