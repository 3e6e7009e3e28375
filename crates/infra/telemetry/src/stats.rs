//! Per-metric statistics with windowed percentiles

use common::MetricKind;
use serde::Serialize;
use std::collections::VecDeque;

/// Samples retained for percentile estimation.
pub const PERCENTILE_WINDOW: usize = 1000;

/// Samples retained for gauge trend display.
pub const GAUGE_TRAIL: usize = 100;

/// Minimum window size before percentiles are computed.
const MIN_PERCENTILE_SAMPLES: usize = 10;

/// Folded statistics for one named metric.
#[derive(Clone, Debug, Serialize)]
pub struct MetricStats {
    pub name: String,
    pub kind: MetricKind,
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    /// Latest value (gauges) or latest sample (others).
    pub last: u64,
    #[serde(skip)]
    window: VecDeque<u64>,
}

impl MetricStats {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            count: 0,
            min: u64::MAX,
            max: 0,
            sum: 0,
            mean: 0.0,
            p50: 0,
            p90: 0,
            p95: 0,
            p99: 0,
            p999: 0,
            last: 0,
            window: VecDeque::new(),
        }
    }

    /// Fold one observation in, honoring the metric kind's semantics.
    pub fn update(&mut self, value: u64) {
        self.count += 1;
        self.last = value;
        match self.kind {
            MetricKind::Counter => {
                self.sum += value;
            }
            MetricKind::Gauge => {
                self.sum = value;
                self.push_sample(value, GAUGE_TRAIL);
            }
            MetricKind::Latency | MetricKind::Histogram => {
                self.min = self.min.min(value);
                self.max = self.max.max(value);
                self.sum += value;
                self.mean = self.sum as f64 / self.count as f64;
                self.push_sample(value, PERCENTILE_WINDOW);
                if self.window.len() >= MIN_PERCENTILE_SAMPLES {
                    self.recompute_percentiles();
                }
            }
        }
    }

    fn push_sample(&mut self, value: u64, cap: usize) {
        if self.window.len() == cap {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    fn recompute_percentiles(&mut self) {
        let mut sorted: Vec<u64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let n = sorted.len();
        self.p50 = sorted[n / 2];
        self.p90 = sorted[(n * 90 / 100).min(n - 1)];
        self.p95 = sorted[(n * 95 / 100).min(n - 1)];
        self.p99 = sorted[(n * 99 / 100).min(n - 1)];
        self.p999 = sorted[(n * 999 / 1000).min(n - 1)];
    }

    /// The single value carried on the wire for this metric: mean for
    /// distributions, accumulated sum for counters, latest for gauges.
    pub fn published_value(&self) -> f64 {
        match self.kind {
            MetricKind::Counter => self.sum as f64,
            MetricKind::Gauge => self.last as f64,
            MetricKind::Latency | MetricKind::Histogram => self.mean,
        }
    }

    /// Recent samples, oldest first.
    pub fn window(&self) -> impl Iterator<Item = u64> + '_ {
        self.window.iter().copied()
    }
}
