//! Seeded random-walk tick generator
//!
//! Stands in for a live feed in tests and demo runs. Prices follow a
//! bounded random walk around each symbol's starting price with a spread
//! proportional to price; the walk is fully determined by the seed.

use common::{MarketData, Symbol};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use crate::source::FeedSource;

struct SymbolState {
    symbol: Symbol,
    price: f64,
}

pub struct MockFeed {
    symbols: Vec<SymbolState>,
    rng: StdRng,
    interval: Duration,
    next_emit: Instant,
    cursor: usize,
    ticks_emitted: u64,
    exchange_clock_ns: u64,
}

impl MockFeed {
    /// `frequency_hz` is the aggregate tick rate across all symbols.
    pub fn new(symbols: &[(&str, f64)], frequency_hz: u32, seed: u64) -> Self {
        let interval = if frequency_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(frequency_hz))
        };
        Self {
            symbols: symbols
                .iter()
                .map(|(name, price)| SymbolState {
                    symbol: Symbol::new(name),
                    price: *price,
                })
                .collect(),
            rng: StdRng::seed_from_u64(seed),
            interval,
            next_emit: Instant::now(),
            cursor: 0,
            ticks_emitted: 0,
            exchange_clock_ns: 1_600_000_000_000_000_000,
        }
    }

    pub fn ticks_emitted(&self) -> u64 {
        self.ticks_emitted
    }

    fn generate(&mut self) -> MarketData {
        let idx = self.cursor;
        self.cursor = (self.cursor + 1) % self.symbols.len();

        // Bounded walk: +/- 5 bps per tick.
        let drift: f64 = self.rng.gen_range(-0.0005..0.0005);
        let state = &mut self.symbols[idx];
        state.price = (state.price * (1.0 + drift)).max(0.01);

        let half_spread = state.price * 0.0001;
        let bid_size = self.rng.gen_range(100..=1000);
        let ask_size = self.rng.gen_range(100..=1000);
        let last_size = self.rng.gen_range(1..=500);
        self.exchange_clock_ns += 1_000_000;
        self.ticks_emitted += 1;

        MarketData {
            symbol: state.symbol,
            bid_price: state.price - half_spread,
            ask_price: state.price + half_spread,
            bid_size,
            ask_size,
            last_price: state.price,
            last_size,
            exchange_timestamp: self.exchange_clock_ns,
        }
    }
}

impl FeedSource for MockFeed {
    fn next_tick(&mut self) -> Option<MarketData> {
        if self.symbols.is_empty() {
            return None;
        }
        if !self.interval.is_zero() {
            let now = Instant::now();
            if now < self.next_emit {
                return None;
            }
            self.next_emit = now + self.interval;
        }
        Some(self.generate())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_well_formed() {
        let mut feed = MockFeed::new(&[("AAPL", 190.0), ("MSFT", 410.0)], 0, 42);
        for _ in 0..100 {
            let tick = feed.next_tick().unwrap();
            assert!(tick.is_valid(), "generated tick must be valid: {tick:?}");
            assert!(tick.bid_price < tick.ask_price);
        }
        assert_eq!(feed.ticks_emitted(), 100);
    }

    #[test]
    fn same_seed_same_walk() {
        let mut a = MockFeed::new(&[("SPY", 512.0)], 0, 7);
        let mut b = MockFeed::new(&[("SPY", 512.0)], 0, 7);
        for _ in 0..50 {
            assert_eq!(a.next_tick(), b.next_tick());
        }
    }

    #[test]
    fn symbols_rotate() {
        let mut feed = MockFeed::new(&[("A", 10.0), ("B", 20.0)], 0, 1);
        let first = feed.next_tick().unwrap();
        let second = feed.next_tick().unwrap();
        assert_ne!(first.symbol, second.symbol);
    }
}
