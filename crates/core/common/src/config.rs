//! Flat `key=value` configuration
//!
//! Lines are `key=value`, `#` starts a comment, blank lines are skipped.
//! Unknown keys are kept but never interpreted, so configs written for a
//! newer build load cleanly on an older one.

use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::warn;

use crate::constants::defaults;
use crate::errors::ConfigError;

#[derive(Clone, Debug, Default)]
pub struct Config {
    values: FxHashMap<String, String>,
}

impl Config {
    /// Empty configuration; every getter falls back to its default.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_str_lossy(&text))
    }

    /// Parse config text. Malformed lines (no `=`) are logged and skipped.
    pub fn from_str_lossy(text: &str) -> Self {
        let mut values = FxHashMap::default();
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(idx) => &raw[..idx],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => warn!(line = lineno + 1, content = raw, "ignoring malformed config line"),
            }
        }
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.parse_or(key, default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.parse_or(key, default)
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.parse_or(key, default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    fn parse_or<T: std::str::FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = raw, "unparseable config value, using default");
                default
            }),
            None => default,
        }
    }

    // Endpoint accessors with platform defaults.

    pub fn market_data_endpoint(&self) -> String {
        self.get_str("market_data.endpoint", defaults::MARKET_DATA_ENDPOINT)
    }

    pub fn signals_endpoint(&self) -> String {
        self.get_str("signals.endpoint", defaults::SIGNALS_ENDPOINT)
    }

    pub fn executions_endpoint(&self) -> String {
        self.get_str("executions.endpoint", defaults::EXECUTIONS_ENDPOINT)
    }

    pub fn positions_endpoint(&self) -> String {
        self.get_str("positions.endpoint", defaults::POSITIONS_ENDPOINT)
    }

    pub fn logger_endpoint(&self) -> String {
        self.get_str("logger.endpoint", defaults::LOGGER_ENDPOINT)
    }

    pub fn control_endpoint(&self) -> String {
        self.get_str("control.endpoint", defaults::CONTROL_ENDPOINT)
    }

    /// Per-service metrics publisher endpoint, e.g.
    /// `metrics.strategy-engine.endpoint`.
    pub fn metrics_endpoint(&self, service: &str) -> String {
        let key = format!("metrics.{service}.endpoint");
        match self.get(&key) {
            Some(ep) => ep.to_string(),
            None => defaults::metrics_endpoint(service),
        }
    }
}
