//! Broker adapter seam
//!
//! Live connectivity is an external collaborator; the gateway only needs
//! this trait. Vendor wrappers (REST/WebSocket clients) implement it out
//! of tree.

use common::{OrderExecution, Symbol, TradingSignal};

/// Order-entry surface of a live broker.
pub trait BrokerAdapter: Send {
    fn submit_market_order(&mut self, order_id: u64, symbol: Symbol, quantity: i64);
    fn submit_limit_order(&mut self, order_id: u64, symbol: Symbol, quantity: i64, price: f64);
    fn cancel_order(&mut self, order_id: u64) -> bool;

    /// Completed/partial executions since the last poll.
    fn poll_executions(&mut self) -> Vec<OrderExecution>;

    fn is_market_open(&self) -> bool;
    fn buying_power(&self) -> f64;
    fn name(&self) -> &str;
}

/// Route a signal through the right submit call.
pub fn submit_signal(broker: &mut dyn BrokerAdapter, order_id: u64, signal: &TradingSignal) {
    let quantity = match signal.action {
        common::SignalAction::Buy => i64::from(signal.quantity),
        common::SignalAction::Sell => -i64::from(signal.quantity),
        _ => return,
    };
    match signal.order_type {
        common::OrderType::Market => broker.submit_market_order(order_id, signal.symbol, quantity),
        _ => broker.submit_limit_order(order_id, signal.symbol, quantity, signal.price),
    }
}
