//! Simulation: fills, replay and backtests
//!
//! The [`fill::FillSimulator`] models executions against live market
//! snapshots under five fill models and doubles as the paper backend for
//! the order gateway. The [`player::HistoricalPlayer`] replays recorded
//! ticks onto the live market-data transport at a configurable speed, and
//! [`backtest`] wires both into the full strategy/gateway/risk pipeline.

pub mod backtest;
pub mod fill;
pub mod player;

pub use backtest::{BacktestConfig, BacktestReport, run_backtest};
pub use fill::{FillConfig, FillModel, FillSimulator, MarketState, SimStats};
pub use player::{HistoricalPlayer, PlayerConfig, PlayerProgress};
