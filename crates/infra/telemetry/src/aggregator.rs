//! Cross-service metrics aggregation
//!
//! Subscribes to every service's metrics endpoint and merges snapshots
//! into a `service -> {last_update, online, metrics}` table. A service
//! that goes silent past the offline threshold is marked OFFLINE; any
//! later snapshot flips it back to ONLINE with its metric history intact.

use bus::Subscriber;
use common::{Clock, Message, MetricKind};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Silence threshold after which a service is considered offline.
pub const OFFLINE_AFTER: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Serialize)]
pub struct MetricValue {
    pub value: f64,
    pub kind: MetricKind,
}

/// Aggregated view of one service.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub online: bool,
    pub last_update_ns: u64,
    pub metrics: FxHashMap<String, MetricValue>,
}

pub struct MetricsAggregator {
    clock: Arc<Clock>,
    table: Arc<Mutex<FxHashMap<String, ServiceHealth>>>,
    offline_after: Duration,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    subscribers: Option<Vec<Box<dyn Subscriber>>>,
}

impl MetricsAggregator {
    /// Build over already-connected subscribers, one per service metrics
    /// endpoint.
    pub fn new(clock: Arc<Clock>, subscribers: Vec<Box<dyn Subscriber>>) -> Self {
        Self::with_offline_after(clock, subscribers, OFFLINE_AFTER)
    }

    pub fn with_offline_after(
        clock: Arc<Clock>,
        subscribers: Vec<Box<dyn Subscriber>>,
        offline_after: Duration,
    ) -> Self {
        Self {
            clock,
            table: Arc::new(Mutex::new(FxHashMap::default())),
            offline_after,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            subscribers: Some(subscribers),
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut subscribers) = self.subscribers.take() else {
            return;
        };
        let clock = Arc::clone(&self.clock);
        let table = Arc::clone(&self.table);
        let running = Arc::clone(&self.running);
        let offline_after_ns = self.offline_after.as_nanos() as u64;
        self.thread = Some(std::thread::spawn(move || {
            let mut buf = vec![0u8; 1 << 20];
            while running.load(Ordering::Acquire) {
                let mut idle = true;
                for subscriber in subscribers.iter_mut() {
                    match subscriber.recv(&mut buf, true) {
                        Ok(Some(len)) => {
                            idle = false;
                            ingest(&clock, &table, &buf[..len]);
                        }
                        Ok(None) => {}
                        Err(err) => warn!(%err, "aggregator receive error"),
                    }
                }
                sweep_offline(&clock, &table, offline_after_ns);
                if idle {
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
            for subscriber in subscribers.iter_mut() {
                subscriber.close();
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

    /// Current table, sorted by service name.
    pub fn snapshot(&self) -> Vec<ServiceHealth> {
        let table = self.table.lock();
        let mut out: Vec<ServiceHealth> = table.values().cloned().collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    /// JSON export for the control plane and dashboards.
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Feed one raw metrics message directly (testing and in-process use).
    pub fn ingest_frame(&self, frame: &[u8]) {
        ingest(&self.clock, &self.table, frame);
    }

    /// Run one offline sweep immediately.
    pub fn sweep_now(&self) {
        sweep_offline(
            &self.clock,
            &self.table,
            self.offline_after.as_nanos() as u64,
        );
    }
}

impl Drop for MetricsAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest(clock: &Clock, table: &Mutex<FxHashMap<String, ServiceHealth>>, frame: &[u8]) {
    let snapshot = match Message::decode(frame) {
        Ok(Message::MetricsSnapshot(_, snap)) => snap,
        Ok(other) => {
            warn!(msg_type = ?other.header().msg_type, "unexpected message on metrics topic");
            return;
        }
        Err(err) => {
            warn!(%err, "undecodable metrics frame");
            return;
        }
    };

    let mut table = table.lock();
    let entry = table
        .entry(snapshot.service_name.clone())
        .or_insert_with(|| {
            info!(service = %snapshot.service_name, "service discovered");
            ServiceHealth {
                service: snapshot.service_name.clone(),
                online: false,
                last_update_ns: 0,
                metrics: FxHashMap::default(),
            }
        });
    if !entry.online {
        info!(service = %entry.service, "service ONLINE");
    }
    entry.online = true;
    entry.last_update_ns = clock.now_ns();
    for metric in snapshot.metrics {
        entry.metrics.insert(
            metric.name,
            MetricValue {
                value: metric.value,
                kind: metric.kind,
            },
        );
    }
}

fn sweep_offline(
    clock: &Clock,
    table: &Mutex<FxHashMap<String, ServiceHealth>>,
    offline_after_ns: u64,
) {
    let now = clock.now_ns();
    let mut table = table.lock();
    for entry in table.values_mut() {
        if entry.online && now.saturating_sub(entry.last_update_ns) > offline_after_ns {
            entry.online = false;
            warn!(service = %entry.service, "service OFFLINE");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{HeaderFactory, MetricEntryWire, MetricsSnapshot};

    fn frame_for(headers: &HeaderFactory, service: &str, value: f64) -> Vec<u8> {
        headers.frame(&MetricsSnapshot {
            service_name: service.to_string(),
            timestamp_ns: 0,
            metrics: vec![MetricEntryWire {
                name: "throughput.messages_processed".to_string(),
                value,
                kind: MetricKind::Counter,
            }],
        })
    }

    #[test]
    fn online_offline_online_cycle_preserves_history() {
        let clock = Arc::new(Clock::for_tests());
        let headers = HeaderFactory::new(Arc::clone(&clock));
        let aggregator = MetricsAggregator::with_offline_after(
            Arc::clone(&clock),
            Vec::new(),
            Duration::from_millis(50),
        );

        aggregator.ingest_frame(&frame_for(&headers, "svc-a", 10.0));
        let snap = aggregator.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].online, "first message must mark service online");

        // Silence past the threshold flips it offline.
        std::thread::sleep(Duration::from_millis(80));
        aggregator.sweep_now();
        assert!(!aggregator.snapshot()[0].online);

        // Any subsequent message flips it back with history intact.
        aggregator.ingest_frame(&frame_for(&headers, "svc-a", 20.0));
        let snap = aggregator.snapshot();
        assert!(snap[0].online);
        assert_eq!(
            snap[0].metrics["throughput.messages_processed"].value,
            20.0
        );
    }

    #[test]
    fn multiple_services_tracked_independently() {
        let clock = Arc::new(Clock::for_tests());
        let headers = HeaderFactory::new(Arc::clone(&clock));
        let aggregator = MetricsAggregator::with_offline_after(
            Arc::clone(&clock),
            Vec::new(),
            Duration::from_millis(50),
        );
        aggregator.ingest_frame(&frame_for(&headers, "svc-a", 1.0));
        aggregator.ingest_frame(&frame_for(&headers, "svc-b", 2.0));

        let snap = aggregator.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].service, "svc-a");
        assert_eq!(snap[1].service, "svc-b");

        let json = aggregator.snapshot_json();
        assert!(json.contains("svc-a") && json.contains("svc-b"));
    }

    #[test]
    fn end_to_end_over_ring_transport() {
        use bus::TransportFactory;
        use common::constants::topics;

        let clock = Arc::new(Clock::for_tests());
        let headers = HeaderFactory::new(Arc::clone(&clock));
        let factory = TransportFactory::new();
        let publisher = factory.publisher("ring://agg-test").unwrap();
        let subscriber = factory
            .subscriber("ring://agg-test", &[topics::METRICS])
            .unwrap();

        let mut aggregator = MetricsAggregator::with_offline_after(
            Arc::clone(&clock),
            vec![subscriber],
            Duration::from_secs(5),
        );
        aggregator.start();

        publisher
            .publish(topics::METRICS, &frame_for(&headers, "svc-ring", 7.0), true)
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snap = aggregator.snapshot();
            if !snap.is_empty() {
                assert_eq!(snap[0].service, "svc-ring");
                break;
            }
            assert!(std::time::Instant::now() < deadline, "snapshot never arrived");
            std::thread::sleep(Duration::from_millis(10));
        }
        aggregator.stop();
    }
}
