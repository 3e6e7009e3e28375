//! Endpoint defaults and topic names shared by the services

/// Default transport endpoints, overridable through configuration.
pub mod defaults {
    pub const LOGGER_ENDPOINT: &str = "tcp://127.0.0.1:5555";
    pub const MARKET_DATA_ENDPOINT: &str = "tcp://127.0.0.1:5556";
    pub const EXECUTIONS_ENDPOINT: &str = "tcp://127.0.0.1:5557";
    pub const SIGNALS_ENDPOINT: &str = "tcp://127.0.0.1:5558";
    pub const POSITIONS_ENDPOINT: &str = "tcp://127.0.0.1:5559";
    pub const CONTROL_ENDPOINT: &str = "tcp://127.0.0.1:5560";

    /// Metrics publisher ports are assigned per service, starting here.
    pub const METRICS_BASE_PORT: u16 = 5561;

    const METRICS_SERVICES: &[(&str, u16)] = &[
        ("strategy-engine", 0),
        ("market-data", 1),
        ("order-gateway", 2),
        ("position-risk", 3),
    ];

    /// Default metrics endpoint for a known service name; unknown services
    /// get the base port (callers are expected to configure those).
    pub fn metrics_endpoint(service: &str) -> String {
        let offset = METRICS_SERVICES
            .iter()
            .find(|(name, _)| *name == service)
            .map_or(0, |(_, off)| *off);
        format!("tcp://127.0.0.1:{}", METRICS_BASE_PORT + offset)
    }

    /// All default metrics publisher endpoints, for the aggregator side.
    pub fn metrics_endpoints() -> Vec<String> {
        METRICS_SERVICES
            .iter()
            .map(|(name, _)| metrics_endpoint(name))
            .collect()
    }
}

/// Topic names used on pub/sub transports.
pub mod topics {
    pub const MARKET_DATA: &str = "md";
    pub const ORDER_BOOK: &str = "book";
    pub const EXECUTIONS: &str = "exec";
    pub const POSITIONS: &str = "pos";
    pub const RISK: &str = "risk";
    pub const METRICS: &str = "metrics";
    pub const CONTROL: &str = "ctl";
    pub const LOG: &str = "log";
}
