//! Core types for the Tickforge trading platform
//!
//! Everything in this crate is shared by the services: the fixed-width
//! symbol type, the packed wire messages, the calibrated monotonic clock
//! and the flat key=value configuration loader.

pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod messages;
pub mod types;

pub use clock::Clock;
pub use config::Config;
pub use errors::{ConfigError, WireError};
pub use messages::{
    ControlCommand, HEADER_LEN, HeaderFactory, LogMessage, MarketData, Message, MessageHeader,
    MessageType, MetricEntryWire, MetricsSnapshot, OrderBookUpdate, OrderExecution, PositionUpdate,
    RiskAlert, SystemStatus, TradingSignal, WireRecord,
};
pub use types::{
    BookSide, BookUpdateType, ControlAction, ExecutionType, LogLevel, MetricKind, OrderType,
    RiskLevel, SignalAction, Symbol,
};
