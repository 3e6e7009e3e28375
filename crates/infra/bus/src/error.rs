//! Transport error taxonomy

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint `{0}` (expected tcp://host:port or ring://name)")]
    InvalidEndpoint(String),

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("connection failure on {endpoint}: {source}")]
    Connection {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("ring `{0}` does not exist; bind it before connecting")]
    RingNotBound(String),

    #[error("ring `{0}` already has a producer")]
    RingProducerTaken(String),

    #[error("ring `{0}` has no free consumer slots")]
    RingConsumersExhausted(String),

    #[error("consumer evicted after falling beyond the high-water mark")]
    Evicted,

    #[error("endpoint is closed")]
    Closed,

    #[error("role {role} is not supported by the {backend} backend")]
    UnsupportedRole {
        role: &'static str,
        backend: &'static str,
    },
}
