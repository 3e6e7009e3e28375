//! Historical data replay
//!
//! Replays timestamped ticks onto the same market-data transport the live
//! feed uses, paced against the wall clock: tick `i` goes out at
//! `t0 + (d_i - d_0) / speed`. A speed of 0 fast-forwards with no delay.
//! Strategies downstream cannot tell replay from live.

use bus::Publisher;
use common::HeaderFactory;
use common::constants::topics;
use feeds::HistoricalDataPoint;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct PlayerConfig {
    /// Playback speed multiplier; 0 means no pacing at all.
    pub speed: f64,
    /// Inclusive replay range in data-clock milliseconds.
    pub start_ts_ms: Option<u64>,
    pub end_ts_ms: Option<u64>,
    /// Emit a progress report every N published ticks.
    pub progress_every: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            start_ts_ms: None,
            end_ts_ms: None,
            progress_every: 1000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PlayerProgress {
    pub published: u64,
    pub total: u64,
    pub current_ts_ms: u64,
}

impl PlayerProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.published as f64 / self.total as f64
        }
    }
}

pub struct HistoricalPlayer {
    data: Arc<Vec<HistoricalDataPoint>>,
    publisher: Arc<dyn Publisher>,
    headers: Arc<HeaderFactory>,
    config: PlayerConfig,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    progress: Arc<Mutex<PlayerProgress>>,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl HistoricalPlayer {
    /// `data` must be sorted and deduplicated by the supplier (the CSV
    /// loader sorts).
    pub fn new(
        data: Vec<HistoricalDataPoint>,
        publisher: Arc<dyn Publisher>,
        headers: Arc<HeaderFactory>,
        config: PlayerConfig,
    ) -> Self {
        Self {
            data: Arc::new(data),
            publisher,
            headers,
            config,
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(Mutex::new(PlayerProgress::default())),
            on_complete: None,
            thread: None,
        }
    }

    /// Install a callback invoked once when the sequence is exhausted.
    pub fn on_complete(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_complete = Some(Box::new(callback));
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("player already running");
            return;
        }
        self.finished.store(false, Ordering::Release);

        let data = Arc::clone(&self.data);
        let publisher = Arc::clone(&self.publisher);
        let headers = Arc::clone(&self.headers);
        let config = self.config;
        let running = Arc::clone(&self.running);
        let finished = Arc::clone(&self.finished);
        let progress = Arc::clone(&self.progress);
        let on_complete = self.on_complete.take();

        self.thread = Some(std::thread::spawn(move || {
            playback_loop(
                &data, &*publisher, &headers, config, &running, &progress,
            );
            finished.store(true, Ordering::Release);
            running.store(false, Ordering::Release);
            if let Some(callback) = on_complete {
                callback();
            }
        }));
    }

    /// Stop playback and join the thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Block until playback ends on its own.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> PlayerProgress {
        *self.progress.lock()
    }
}

impl Drop for HistoricalPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_loop(
    data: &[HistoricalDataPoint],
    publisher: &dyn Publisher,
    headers: &HeaderFactory,
    config: PlayerConfig,
    running: &AtomicBool,
    progress: &Mutex<PlayerProgress>,
) {
    let in_range = |ts: u64| {
        config.start_ts_ms.is_none_or(|s| ts >= s) && config.end_ts_ms.is_none_or(|e| ts <= e)
    };
    let total = data.iter().filter(|p| in_range(p.timestamp_ms)).count() as u64;
    progress.lock().total = total;
    info!(total, speed = config.speed, "historical playback starting");

    let wall_start = Instant::now();
    let mut data_start_ms: Option<u64> = None;
    let mut published = 0u64;

    for point in data {
        if !running.load(Ordering::Acquire) {
            break;
        }
        if !in_range(point.timestamp_ms) {
            continue;
        }
        let d0 = *data_start_ms.get_or_insert(point.timestamp_ms);

        if config.speed > 0.0 {
            let offset_ms = (point.timestamp_ms - d0) as f64 / config.speed;
            let target = wall_start + Duration::from_millis(offset_ms as u64);
            loop {
                let now = Instant::now();
                if now >= target {
                    break;
                }
                if !running.load(Ordering::Acquire) {
                    return;
                }
                // Sleep in slices so stop() stays responsive.
                std::thread::sleep((target - now).min(Duration::from_millis(50)));
            }
        }

        let frame = headers.frame(&point.to_market_data());
        match publisher.publish(topics::MARKET_DATA, &frame, false) {
            Ok(true) => {
                published += 1;
                let mut p = progress.lock();
                p.published = published;
                p.current_ts_ms = point.timestamp_ms;
            }
            Ok(false) => warn!(ts = point.timestamp_ms, "replay tick dropped under back-pressure"),
            Err(err) => warn!(%err, "replay publish failed"),
        }

        if config.progress_every > 0 && published % config.progress_every == 0 && published > 0 {
            debug!(
                published,
                total,
                pct = (published as f64 / total.max(1) as f64) * 100.0,
                "replay progress"
            );
        }
    }

    info!(published, "historical playback complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus::TransportFactory;
    use common::{Clock, Message, Symbol};

    fn points(timestamps: &[u64]) -> Vec<HistoricalDataPoint> {
        timestamps
            .iter()
            .map(|&ts| HistoricalDataPoint {
                timestamp_ms: ts,
                symbol: Symbol::new("SPY"),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1000,
                bid: 99.95,
                ask: 100.05,
            })
            .collect()
    }

    fn rig(name: &str) -> (Arc<dyn Publisher>, Box<dyn bus::Subscriber>, Arc<HeaderFactory>) {
        let factory = TransportFactory::new();
        let endpoint = format!("ring://{name}");
        let publisher: Arc<dyn Publisher> = Arc::from(factory.publisher(&endpoint).unwrap());
        let subscriber = factory
            .subscriber(&endpoint, &[topics::MARKET_DATA])
            .unwrap();
        let headers = Arc::new(HeaderFactory::new(Arc::new(Clock::for_tests())));
        (publisher, subscriber, headers)
    }

    fn drain_ticks(subscriber: &mut dyn bus::Subscriber, expect: usize) -> Vec<common::MarketData> {
        let mut ticks = Vec::new();
        let mut buf = vec![0u8; 4096];
        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.len() < expect && Instant::now() < deadline {
            if let Ok(Some(len)) = subscriber.recv(&mut buf, false) {
                if let Ok(Message::MarketData(_, md)) = Message::decode(&buf[..len]) {
                    ticks.push(md);
                }
            }
        }
        ticks
    }

    #[test]
    fn fast_forward_replays_everything_in_order() {
        let (publisher, mut subscriber, headers) = rig("player-ff");
        let mut player = HistoricalPlayer::new(
            points(&[1000, 2000, 3000, 4000]),
            publisher,
            headers,
            PlayerConfig {
                speed: 0.0,
                ..PlayerConfig::default()
            },
        );
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        player.on_complete(move || flag.store(true, Ordering::Release));
        player.start();
        player.join();

        assert!(player.is_finished());
        assert!(completed.load(Ordering::Acquire));
        let ticks = drain_ticks(&mut *subscriber, 4);
        assert_eq!(ticks.len(), 4);
        let stamps: Vec<u64> = ticks.iter().map(|t| t.exchange_timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort_unstable();
        assert_eq!(stamps, sorted, "replay must preserve order");
        assert_eq!(player.progress().published, 4);
    }

    #[test]
    fn range_filter_is_inclusive() {
        let (publisher, mut subscriber, headers) = rig("player-range");
        let mut player = HistoricalPlayer::new(
            points(&[1000, 2000, 3000, 4000, 5000]),
            publisher,
            headers,
            PlayerConfig {
                speed: 0.0,
                start_ts_ms: Some(2000),
                end_ts_ms: Some(4000),
                ..PlayerConfig::default()
            },
        );
        player.start();
        player.join();

        let ticks = drain_ticks(&mut *subscriber, 3);
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].exchange_timestamp, 2_000_000_000);
        assert_eq!(ticks[2].exchange_timestamp, 4_000_000_000);
        assert_eq!(player.progress().total, 3);
    }

    #[test]
    fn paced_replay_respects_the_data_clock() {
        let (publisher, mut subscriber, headers) = rig("player-paced");
        // 3 ticks spanning 100 ms of data time at 1x speed.
        let mut player = HistoricalPlayer::new(
            points(&[0, 50, 100]),
            publisher,
            headers,
            PlayerConfig {
                speed: 1.0,
                ..PlayerConfig::default()
            },
        );
        let start = Instant::now();
        player.start();
        player.join();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(90), "elapsed {elapsed:?}");
        assert_eq!(drain_ticks(&mut *subscriber, 3).len(), 3);
    }

    #[test]
    fn stop_interrupts_playback() {
        let (publisher, _subscriber, headers) = rig("player-stop");
        let mut player = HistoricalPlayer::new(
            points(&(0..1000).map(|i| i * 100).collect::<Vec<_>>()),
            publisher,
            headers,
            PlayerConfig {
                speed: 1.0,
                ..PlayerConfig::default()
            },
        );
        player.start();
        std::thread::sleep(Duration::from_millis(50));
        player.stop();
        assert!(player.progress().published < 1000);
    }
}
