//! Metrics pipeline
//!
//! Four layers, each feeding the next: per-thread wait-free ingest
//! ([`recorder`]), a background collector folding entries into statistics
//! ([`collector`]), a per-service publisher serializing snapshots onto the
//! metrics topic ([`publisher`]), and a cross-service aggregator with
//! online/offline tracking ([`aggregator`]).

pub mod aggregator;
pub mod collector;
pub mod names;
pub mod publisher;
pub mod recorder;
pub mod stats;

pub use aggregator::{MetricsAggregator, ServiceHealth};
pub use collector::MetricsCollector;
pub use publisher::MetricsPublisher;
pub use recorder::{MetricsHub, ScopedTimer, ThreadRecorder};
pub use stats::MetricStats;
