//! Canonical metric labels for the critical paths
//!
//! Keeping these in one place lets the aggregator and dashboards rely on
//! stable names across services.

// Market data path
pub const MD_RECEIVE_LATENCY: &str = "market_data.receive_latency_ns";
pub const MD_PARSE_LATENCY: &str = "market_data.parse_latency_ns";
pub const MD_PUBLISH_LATENCY: &str = "market_data.publish_latency_ns";
pub const MD_TICK_LATENCY: &str = "market_data.tick_latency_ns";

// Strategy path
pub const STRATEGY_PROCESS_LATENCY: &str = "strategy.process_latency_ns";
pub const SIGNAL_PUBLISH_LATENCY: &str = "strategy.signal_publish_latency_ns";

// Order path
pub const ORDER_PROCESS_LATENCY: &str = "order.process_latency_ns";
pub const RISK_CHECK_LATENCY: &str = "risk.check_latency_ns";

// End-to-end
pub const TICK_TO_SIGNAL: &str = "e2e.tick_to_signal_ns";
pub const TICK_TO_ORDER: &str = "e2e.tick_to_order_ns";

// Throughput
pub const MESSAGES_PROCESSED: &str = "throughput.messages_processed";
pub const SIGNALS_GENERATED: &str = "throughput.signals_generated";
pub const ORDERS_SUBMITTED: &str = "throughput.orders_submitted";
pub const ORDERS_FILLED: &str = "throughput.orders_filled";

// Loss accounting
pub const MD_DROPS: &str = "market_data.drops";
pub const PARSE_ERRORS: &str = "parse_errors";
pub const BOOK_REJECTS: &str = "book_rejects";
pub const METRIC_DROPS: &str = "telemetry.ingest_drops";

// Health gauges
pub const QUEUE_DEPTH: &str = "system.queue_depth";
pub const POSITIONS_OPEN: &str = "positions.open_count";
pub const PNL_TOTAL: &str = "pnl.total_usd";
