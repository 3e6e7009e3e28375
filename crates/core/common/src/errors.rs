//! Shared error types

use thiserror::Error;

/// Faults while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated message: {0}")]
    Truncated(#[from] std::io::Error),

    #[error("invalid {field} value {value}")]
    InvalidEnum { field: &'static str, value: u16 },

    #[error("payload size mismatch: header says {declared}, got {actual} bytes")]
    PayloadSizeMismatch { declared: u16, actual: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
