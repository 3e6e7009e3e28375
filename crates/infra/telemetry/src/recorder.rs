//! Wait-free per-thread metric ingest
//!
//! Each processing thread asks the [`MetricsHub`] for its own
//! [`ThreadRecorder`], which owns the producer side of an SPSC ring. The
//! collector drains the consumer sides on its cadence. Recording never
//! blocks and never allocates; when a ring fills up the entry is dropped
//! and a counter remembers it.

use bus::{SpscConsumer, SpscProducer, spsc_channel};
use common::{Clock, MetricKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Entries buffered per thread. Power of two.
pub const THREAD_BUFFER_ENTRIES: usize = 1 << 16;

/// One metric observation, as queued between a thread and the collector.
#[derive(Clone, Copy, Debug)]
pub struct MetricEntry {
    pub label: &'static str,
    pub value: u64,
    pub kind: MetricKind,
    pub timestamp_ticks: u64,
}

/// Shared registry connecting thread recorders to the collector.
pub struct MetricsHub {
    clock: Arc<Clock>,
    consumers: Mutex<Vec<SpscConsumer<MetricEntry>>>,
    dropped: AtomicU64,
}

impl MetricsHub {
    pub fn new(clock: Arc<Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            consumers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Create the calling thread's recorder. Call once per thread and keep
    /// the handle for the thread's lifetime.
    pub fn recorder(self: &Arc<Self>) -> ThreadRecorder {
        let (producer, consumer) = spsc_channel(THREAD_BUFFER_ENTRIES);
        self.consumers.lock().push(consumer);
        ThreadRecorder {
            hub: Arc::clone(self),
            producer,
        }
    }

    /// Entries lost to full thread buffers since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Drain every registered thread buffer into `sink`. Called by the
    /// collector thread only.
    pub(crate) fn drain(&self, sink: &mut impl FnMut(MetricEntry)) -> usize {
        let consumers = self.consumers.lock();
        let mut total = 0;
        for consumer in consumers.iter() {
            total += consumer.drain_into(sink);
        }
        total
    }
}

/// Producer handle owned by one thread.
pub struct ThreadRecorder {
    hub: Arc<MetricsHub>,
    producer: SpscProducer<MetricEntry>,
}

impl ThreadRecorder {
    fn record(&self, label: &'static str, value: u64, kind: MetricKind) {
        let entry = MetricEntry {
            label,
            value,
            kind,
            timestamp_ticks: self.hub.clock.now_ticks(),
        };
        if self.producer.try_push(entry).is_err() {
            self.hub.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_latency(&self, label: &'static str, nanos: u64) {
        self.record(label, nanos, MetricKind::Latency);
    }

    pub fn increment_counter(&self, label: &'static str) {
        self.record(label, 1, MetricKind::Counter);
    }

    pub fn add_to_counter(&self, label: &'static str, delta: u64) {
        self.record(label, delta, MetricKind::Counter);
    }

    pub fn set_gauge(&self, label: &'static str, value: u64) {
        self.record(label, value, MetricKind::Gauge);
    }

    pub fn record_histogram(&self, label: &'static str, value: u64) {
        self.record(label, value, MetricKind::Histogram);
    }

    /// Time a scope and record the elapsed nanoseconds on drop.
    pub fn timer<'a>(&'a self, label: &'static str) -> ScopedTimer<'a> {
        ScopedTimer {
            recorder: self,
            label,
            start_ticks: self.hub.clock.now_ticks(),
        }
    }

    pub fn clock(&self) -> &Arc<Clock> {
        self.hub.clock()
    }
}

/// RAII latency probe.
pub struct ScopedTimer<'a> {
    recorder: &'a ThreadRecorder,
    label: &'static str,
    start_ticks: u64,
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let clock = &self.recorder.hub.clock;
        let elapsed = clock.elapsed_ns(self.start_ticks, clock.now_ticks());
        self.recorder.record_latency(self.label, elapsed);
    }
}
