//! Market-data fan-out
//!
//! Pulls ticks from a source adapter, stamps the wire header and publishes
//! on the market-data topic. Publishing is non-blocking: when the topic is
//! back-pressured the tick is dropped and counted. Downstream correctness
//! rests on sequence monotonicity, not on lossless delivery.

use bus::Publisher;
use common::constants::topics;
use common::{HeaderFactory, MarketData};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use telemetry::recorder::{MetricsHub, ThreadRecorder};
use telemetry::names;
use tracing::{debug, info, warn};

const IDLE_SLEEP: Duration = Duration::from_micros(200);

pub struct MarketDataHandler {
    source: Option<Box<dyn crate::source::FeedSource>>,
    publisher: Arc<dyn Publisher>,
    headers: Arc<HeaderFactory>,
    hub: Arc<MetricsHub>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    processed: Arc<AtomicU64>,
    drops: Arc<AtomicU64>,
}

impl MarketDataHandler {
    pub fn new(
        source: Box<dyn crate::source::FeedSource>,
        publisher: Arc<dyn Publisher>,
        headers: Arc<HeaderFactory>,
        hub: Arc<MetricsHub>,
    ) -> Self {
        Self {
            source: Some(source),
            publisher,
            headers,
            hub,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            processed: Arc::new(AtomicU64::new(0)),
            drops: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawn the fan-out thread. Runs until [`stop`](Self::stop) or until
    /// the source is exhausted.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut source) = self.source.take() else {
            return;
        };
        let publisher = Arc::clone(&self.publisher);
        let headers = Arc::clone(&self.headers);
        let hub = Arc::clone(&self.hub);
        let running = Arc::clone(&self.running);
        let processed = Arc::clone(&self.processed);
        let drops = Arc::clone(&self.drops);
        self.thread = Some(std::thread::spawn(move || {
            info!(source = source.name(), "market data fan-out started");
            let recorder = hub.recorder();
            while running.load(Ordering::Acquire) {
                match source.next_tick() {
                    Some(tick) => {
                        publish_tick(&tick, &*publisher, &headers, &recorder, &processed, &drops);
                    }
                    None if source.exhausted() => {
                        debug!("source exhausted, fan-out finishing");
                        break;
                    }
                    None => std::thread::sleep(IDLE_SLEEP),
                }
            }
            info!(
                processed = processed.load(Ordering::Relaxed),
                dropped = drops.load(Ordering::Relaxed),
                "market data fan-out stopped"
            );
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for MarketDataHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stamp, frame and publish one tick, recording the latency split.
pub fn publish_tick(
    tick: &MarketData,
    publisher: &dyn Publisher,
    headers: &HeaderFactory,
    recorder: &ThreadRecorder,
    processed: &AtomicU64,
    drops: &AtomicU64,
) {
    if !tick.is_valid() {
        recorder.increment_counter(names::PARSE_ERRORS);
        warn!(symbol = %tick.symbol, "dropping invalid tick");
        return;
    }

    let clock = recorder.clock();
    let t0 = clock.now_ticks();
    let frame = headers.frame(tick);
    let t1 = clock.now_ticks();
    recorder.record_latency(names::MD_PARSE_LATENCY, clock.elapsed_ns(t0, t1));

    match publisher.publish(topics::MARKET_DATA, &frame, true) {
        Ok(true) => {
            let t2 = clock.now_ticks();
            recorder.record_latency(names::MD_PUBLISH_LATENCY, clock.elapsed_ns(t1, t2));
            recorder.record_latency(names::MD_TICK_LATENCY, clock.elapsed_ns(t0, t2));
            recorder.increment_counter(names::MESSAGES_PROCESSED);
            processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            recorder.increment_counter(names::MD_DROPS);
            drops.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            recorder.increment_counter(names::MD_DROPS);
            drops.fetch_add(1, Ordering::Relaxed);
            warn!(%err, "market data publish failed");
        }
    }
}
