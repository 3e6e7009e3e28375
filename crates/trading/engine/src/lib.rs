//! Trading core: strategies, order gateway, positions and risk
//!
//! The [`engine::StrategyEngine`] fans market data and executions into
//! registered strategies, which submit signals through a handle rather
//! than holding a reference back into the engine. The
//! [`gateway::OrderGateway`] turns signals into orders against an
//! execution backend (paper simulator or live broker adapter), and the
//! [`service::PositionRiskService`] keeps signed positions and enforces
//! the risk limits.

pub mod book_pressure;
pub mod broker;
pub mod engine;
pub mod gateway;
pub mod momentum;
pub mod pairs;
pub mod position;
pub mod quoting;
pub mod risk;
pub mod service;
pub mod strategy;

pub use engine::StrategyEngine;
pub use gateway::{ExecutionBackend, GatewayMode, OrderGateway};
pub use momentum::{MomentumConfig, MomentumStrategy};
pub use position::{Position, PositionBook};
pub use risk::{RiskDecision, RiskEngine, RiskLimits};
pub use service::PositionRiskService;
pub use strategy::{SignalSink, Strategy, StrategyCtx};
