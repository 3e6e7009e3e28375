//! Background collector folding thread buffers into statistics

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use crate::recorder::MetricsHub;
use crate::stats::MetricStats;

/// How often thread buffers are drained.
pub const COLLECT_CADENCE: Duration = Duration::from_millis(100);

/// Owns the `name -> stats` map and the thread that feeds it. Sample
/// windows are only ever touched from the collection thread, so a single
/// mutex around the map is enough.
pub struct MetricsCollector {
    hub: Arc<MetricsHub>,
    stats: Arc<Mutex<FxHashMap<String, MetricStats>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    cadence: Duration,
}

impl MetricsCollector {
    pub fn new(hub: Arc<MetricsHub>) -> Self {
        Self::with_cadence(hub, COLLECT_CADENCE)
    }

    pub fn with_cadence(hub: Arc<MetricsHub>, cadence: Duration) -> Self {
        Self {
            hub,
            stats: Arc::new(Mutex::new(FxHashMap::default())),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            cadence,
        }
    }

    /// Spawn the collection thread.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let hub = Arc::clone(&self.hub);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let cadence = self.cadence;
        self.thread = Some(std::thread::spawn(move || {
            debug!("metrics collector thread started");
            while running.load(Ordering::Acquire) {
                collect_once(&hub, &stats);
                std::thread::sleep(cadence);
            }
            // Final sweep so nothing recorded before shutdown is lost.
            collect_once(&hub, &stats);
            debug!("metrics collector thread stopped");
        }));
    }

    /// Stop and join the collection thread.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        info!("metrics collector stopped");
    }

    /// Drain immediately on the caller's thread. Used by tests and by
    /// publishers that want fresh numbers right before a snapshot.
    pub fn collect_now(&self) {
        collect_once(&self.hub, &self.stats);
    }

    /// Copy of the current statistics, sorted by name for stable output.
    pub fn snapshot(&self) -> Vec<MetricStats> {
        let stats = self.stats.lock();
        let mut out: Vec<MetricStats> = stats.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn hub(&self) -> &Arc<MetricsHub> {
        &self.hub
    }

    pub fn clear(&self) {
        self.stats.lock().clear();
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn collect_once(hub: &MetricsHub, stats: &Mutex<FxHashMap<String, MetricStats>>) {
    let mut guard = stats.lock();
    hub.drain(&mut |entry| {
        guard
            .entry(entry.label.to_string())
            .or_insert_with(|| MetricStats::new(entry.label, entry.kind))
            .update(entry.value);
    });
}
