//! High-resolution clock with optional TSC backing
//!
//! On x86_64 the clock reads the time-stamp counter directly and converts
//! ticks to nanoseconds with a frequency calibrated at startup (five 100 ms
//! samples against the OS monotonic clock, averaged). Elsewhere ticks are
//! monotonic nanoseconds. All methods take `&self` on immutable state, so a
//! calibrated clock can be shared across threads without synchronization.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

const CALIBRATION_RUNS: u32 = 5;
const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn read_tsc() -> u64 {
    // SAFETY: RDTSC has no preconditions on x86_64.
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Monotonic clock for header timestamps and latency measurement.
pub struct Clock {
    ticks_per_second: u64,
    tsc: bool,
    origin: Instant,
    origin_ticks: u64,
    wall_origin_ns: u64,
}

impl Clock {
    /// Calibrate against the OS monotonic clock. Takes roughly
    /// `CALIBRATION_RUNS x CALIBRATION_WINDOW` of wall time; call once at
    /// service startup and share via `Arc`.
    pub fn calibrate() -> Arc<Self> {
        Self::calibrate_with(CALIBRATION_RUNS, CALIBRATION_WINDOW)
    }

    /// Instant construction with the nanosecond fallback. Useful in tests
    /// and short-lived tools where a 500 ms calibration pause is not worth
    /// the extra resolution.
    pub fn for_tests() -> Self {
        Self::fallback()
    }

    fn calibrate_with(runs: u32, window: Duration) -> Arc<Self> {
        #[cfg(target_arch = "x86_64")]
        {
            let mut total_hz: u128 = 0;
            let mut valid = 0u32;
            for run in 0..runs {
                let chrono_start = Instant::now();
                let tsc_start = read_tsc();
                std::thread::sleep(window);
                let elapsed_ns = chrono_start.elapsed().as_nanos();
                let ticks = read_tsc().wrapping_sub(tsc_start);
                if elapsed_ns > 0 && ticks > 0 {
                    let hz = u128::from(ticks) * 1_000_000_000 / elapsed_ns;
                    total_hz += hz;
                    valid += 1;
                    debug!(run, hz = hz as u64, "tsc calibration sample");
                }
            }
            if valid > 0 {
                let ticks_per_second = (total_hz / u128::from(valid)) as u64;
                debug!(ticks_per_second, "tsc calibrated");
                return Arc::new(Self {
                    ticks_per_second,
                    tsc: true,
                    origin: Instant::now(),
                    origin_ticks: read_tsc(),
                    wall_origin_ns: wall_clock_ns(),
                });
            }
            warn!("tsc calibration produced no valid samples, using monotonic fallback");
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = (runs, window);
        }
        Arc::new(Self::fallback())
    }

    fn fallback() -> Self {
        Self {
            ticks_per_second: 1_000_000_000,
            tsc: false,
            origin: Instant::now(),
            origin_ticks: 0,
            wall_origin_ns: wall_clock_ns(),
        }
    }

    /// Raw ticks from the underlying counter.
    #[inline]
    pub fn now_ticks(&self) -> u64 {
        #[cfg(target_arch = "x86_64")]
        if self.tsc {
            return read_tsc();
        }
        self.origin.elapsed().as_nanos() as u64
    }

    /// Convert a tick count to nanoseconds.
    #[inline]
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        if self.ticks_per_second == 1_000_000_000 {
            return ticks;
        }
        (u128::from(ticks) * 1_000_000_000 / u128::from(self.ticks_per_second)) as u64
    }

    /// Monotonic nanoseconds anchored to the wall clock at calibration.
    ///
    /// Values are comparable across processes on the same host to within
    /// calibration error, and never go backwards within a process.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        let elapsed = if self.tsc {
            self.ticks_to_ns(self.now_ticks().wrapping_sub(self.origin_ticks))
        } else {
            self.origin.elapsed().as_nanos() as u64
        };
        self.wall_origin_ns + elapsed
    }

    /// Elapsed nanoseconds between two tick readings.
    #[inline]
    pub fn elapsed_ns(&self, start_ticks: u64, end_ticks: u64) -> u64 {
        self.ticks_to_ns(end_ticks.wrapping_sub(start_ticks))
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }

    pub fn is_tsc(&self) -> bool {
        self.tsc
    }
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}
