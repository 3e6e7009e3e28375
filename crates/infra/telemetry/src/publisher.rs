//! Per-service metrics publisher
//!
//! Serializes the collector's snapshot every cadence tick into the
//! fixed-layout metrics message and sends it on the service's metrics
//! endpoint. Failures never reach the recording threads; they only bump an
//! internal error counter.

use bus::Publisher;
use common::constants::topics;
use common::{HeaderFactory, MetricEntryWire, MetricsSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::collector::MetricsCollector;

/// Publish cadence.
pub const PUBLISH_CADENCE: Duration = Duration::from_secs(2);

pub struct MetricsPublisher {
    service_name: String,
    collector: Arc<MetricsCollector>,
    publisher: Arc<dyn Publisher>,
    headers: Arc<HeaderFactory>,
    cadence: Duration,
    running: Arc<AtomicBool>,
    errors: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl MetricsPublisher {
    pub fn new(
        service_name: impl Into<String>,
        collector: Arc<MetricsCollector>,
        publisher: Arc<dyn Publisher>,
        headers: Arc<HeaderFactory>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            collector,
            publisher,
            headers,
            cadence: PUBLISH_CADENCE,
            running: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(AtomicU64::new(0)),
            thread: None,
        }
    }

    /// Override the cadence (tests use a short one).
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let service_name = self.service_name.clone();
        let collector = Arc::clone(&self.collector);
        let publisher = Arc::clone(&self.publisher);
        let headers = Arc::clone(&self.headers);
        let running = Arc::clone(&self.running);
        let errors = Arc::clone(&self.errors);
        let cadence = self.cadence;
        self.thread = Some(std::thread::spawn(move || {
            debug!(service = %service_name, "metrics publisher started");
            while running.load(Ordering::Acquire) {
                publish_once(&service_name, &collector, &*publisher, &headers, &errors);
                // Sleep in small slices so stop() is honored promptly.
                let deadline = std::time::Instant::now() + cadence;
                while running.load(Ordering::Acquire) && std::time::Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Serialize and publish one snapshot immediately.
    pub fn publish_now(&self) {
        publish_once(
            &self.service_name,
            &self.collector,
            &*self.publisher,
            &self.headers,
            &self.errors,
        );
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Drop for MetricsPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish_once(
    service_name: &str,
    collector: &MetricsCollector,
    publisher: &dyn Publisher,
    headers: &HeaderFactory,
    errors: &AtomicU64,
) {
    collector.collect_now();
    let stats = collector.snapshot();
    let mut metrics: Vec<MetricEntryWire> = stats
        .iter()
        .map(|s| MetricEntryWire {
            name: s.name.clone(),
            value: s.published_value(),
            kind: s.kind,
        })
        .collect();
    metrics.push(MetricEntryWire {
        name: crate::names::METRIC_DROPS.to_string(),
        value: collector.hub().dropped() as f64,
        kind: common::MetricKind::Counter,
    });
    let snapshot = MetricsSnapshot {
        service_name: service_name.to_string(),
        timestamp_ns: headers.clock().now_ns(),
        metrics,
    };
    let frame = headers.frame(&snapshot);
    match publisher.publish(topics::METRICS, &frame, true) {
        Ok(true) => {}
        Ok(false) => {
            errors.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            errors.fetch_add(1, Ordering::Relaxed);
            warn!(%err, "metrics publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MetricsHub;
    use bus::TransportFactory;
    use common::{Clock, Message};

    #[test]
    fn snapshot_reaches_subscriber() {
        let clock = Arc::new(Clock::for_tests());
        let hub = MetricsHub::new(Arc::clone(&clock));
        let collector = Arc::new(MetricsCollector::new(Arc::clone(&hub)));
        let recorder = hub.recorder();
        recorder.increment_counter("published");

        let factory = TransportFactory::new();
        let transport: Arc<dyn Publisher> =
            Arc::from(factory.publisher("ring://metrics-test").unwrap());
        let mut subscriber = factory
            .subscriber("ring://metrics-test", &[topics::METRICS])
            .unwrap();

        let headers = Arc::new(HeaderFactory::new(clock));
        let publisher =
            MetricsPublisher::new("unit-test", collector, transport, headers);
        publisher.publish_now();
        assert_eq!(publisher.errors(), 0);

        let mut buf = vec![0u8; 64 * 1024];
        let len = subscriber.recv(&mut buf, true).unwrap().unwrap();
        match Message::decode(&buf[..len]).unwrap() {
            Message::MetricsSnapshot(_, snap) => {
                assert_eq!(snap.service_name, "unit-test");
                let m = snap.metrics.iter().find(|m| m.name == "published").unwrap();
                assert_eq!(m.value, 1.0);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
