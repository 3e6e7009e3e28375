//! Per-symbol order book

use common::{BookSide, BookUpdateType, OrderBookUpdate, Symbol};
use std::collections::BTreeMap;

/// One price level. Identical prices collapse into a single level whose
/// size is replaced, not accumulated (vendor "replace" semantics).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Level {
    pub price: f64,
    pub size: u32,
    pub order_count: u32,
}

impl Level {
    pub fn new(price: f64, size: u32, order_count: u32) -> Self {
        Self {
            price,
            size,
            order_count,
        }
    }
}

/// Price key with a total order so IEEE doubles can key a `BTreeMap`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct PriceKey(f64);

impl Eq for PriceKey {}

impl Ord for PriceKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for PriceKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BookError {
    /// Update sequence at or below the last applied one.
    #[error("stale update: sequence {sequence} <= last {last}")]
    StaleSequence { sequence: u64, last: u64 },

    /// Non-positive price on a level write.
    #[error("invalid price on level update")]
    InvalidPrice,

    /// SNAPSHOT updates must go through `apply_snapshot`.
    #[error("snapshot update routed to apply_update")]
    SnapshotMisrouted,
}

/// L2 book for one symbol: bids descending, asks ascending.
#[derive(Clone, Debug, Default)]
pub struct OrderBook {
    symbol: Symbol,
    bids: BTreeMap<PriceKey, Level>,
    asks: BTreeMap<PriceKey, Level>,
    last_sequence: u64,
    last_update_time: u64,
    rejects: u64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            ..Self::default()
        }
    }

    pub fn symbol(&self) -> Symbol {
        self.symbol
    }

    /// Apply one level update. Stale sequences leave the book untouched.
    pub fn apply_update(&mut self, update: &OrderBookUpdate) -> Result<(), BookError> {
        if self.last_sequence != 0 && update.sequence <= self.last_sequence {
            self.rejects += 1;
            return Err(BookError::StaleSequence {
                sequence: update.sequence,
                last: self.last_sequence,
            });
        }
        if update.update_type == BookUpdateType::Snapshot {
            self.rejects += 1;
            return Err(BookError::SnapshotMisrouted);
        }
        if update.price <= 0.0 && update.update_type != BookUpdateType::Delete {
            self.rejects += 1;
            return Err(BookError::InvalidPrice);
        }

        self.last_sequence = update.sequence;
        self.last_update_time = update.exchange_timestamp;

        let side = match update.side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        let key = PriceKey(update.price);
        match update.update_type {
            BookUpdateType::Add | BookUpdateType::Update => {
                if update.size > 0 {
                    side.insert(
                        key,
                        Level::new(update.price, update.size, update.order_count),
                    );
                } else {
                    // A zero-size write deletes the level.
                    side.remove(&key);
                }
            }
            BookUpdateType::Delete => {
                side.remove(&key);
            }
            BookUpdateType::Snapshot => unreachable!("rejected above"),
        }
        Ok(())
    }

    /// Atomically replace both sides. Zero-size levels are dropped.
    pub fn apply_snapshot(&mut self, bids: &[Level], asks: &[Level], timestamp: u64) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            if level.size > 0 && level.price > 0.0 {
                self.bids.insert(PriceKey(level.price), *level);
            }
        }
        for level in asks {
            if level.size > 0 && level.price > 0.0 {
                self.asks.insert(PriceKey(level.price), *level);
            }
        }
        self.last_update_time = timestamp;
    }

    pub fn best_bid(&self) -> f64 {
        self.bids.last_key_value().map_or(0.0, |(k, _)| k.0)
    }

    pub fn best_ask(&self) -> f64 {
        self.asks.first_key_value().map_or(0.0, |(k, _)| k.0)
    }

    pub fn mid_price(&self) -> f64 {
        let (bid, ask) = (self.best_bid(), self.best_ask());
        if bid > 0.0 && ask > 0.0 {
            (bid + ask) / 2.0
        } else {
            0.0
        }
    }

    pub fn spread(&self) -> f64 {
        let (bid, ask) = (self.best_bid(), self.best_ask());
        if bid > 0.0 && ask > 0.0 { ask - bid } else { 0.0 }
    }

    /// Size at depth `level` (0 = touch).
    pub fn bid_size_at_level(&self, level: usize) -> u32 {
        self.bids.values().rev().nth(level).map_or(0, |l| l.size)
    }

    pub fn ask_size_at_level(&self, level: usize) -> u32 {
        self.asks.values().nth(level).map_or(0, |l| l.size)
    }

    /// Average price paid walking the given side for `shares`. Returns 0
    /// on an empty book; a partial walk averages what was available.
    pub fn volume_weighted_price(&self, side: BookSide, shares: u32) -> f64 {
        if shares == 0 {
            return 0.0;
        }
        let mut remaining = shares;
        let mut cost = 0.0;
        let mut taken = 0u64;
        let mut walk = |level: &Level| {
            let take = remaining.min(level.size);
            cost += level.price * f64::from(take);
            taken += u64::from(take);
            remaining -= take;
            remaining == 0
        };
        match side {
            BookSide::Bid => {
                for level in self.bids.values().rev() {
                    if walk(level) {
                        break;
                    }
                }
            }
            BookSide::Ask => {
                for level in self.asks.values() {
                    if walk(level) {
                        break;
                    }
                }
            }
        }
        if taken > 0 { cost / taken as f64 } else { 0.0 }
    }

    /// Walk-the-book execution cost as a fraction of the touch price.
    pub fn market_impact(&self, side: BookSide, shares: u32) -> f64 {
        if shares == 0 {
            return 0.0;
        }
        let touch = match side {
            BookSide::Bid => self.best_bid(),
            BookSide::Ask => self.best_ask(),
        };
        let vwap = self.volume_weighted_price(side, shares);
        if touch > 0.0 && vwap > 0.0 {
            (vwap - touch).abs() / touch
        } else {
            0.0
        }
    }

    /// `(bid_size - ask_size) / (bid_size + ask_size)` at the touch.
    pub fn bid_ask_imbalance(&self) -> f64 {
        let bid = f64::from(self.bid_size_at_level(0));
        let ask = f64::from(self.ask_size_at_level(0));
        let total = bid + ask;
        if total > 0.0 { (bid - ask) / total } else { 0.0 }
    }

    pub fn total_size(&self, side: BookSide, levels: usize) -> u64 {
        let iter: Box<dyn Iterator<Item = &Level>> = match side {
            BookSide::Bid => Box::new(self.bids.values().rev()),
            BookSide::Ask => Box::new(self.asks.values()),
        };
        iter.take(levels).map(|l| u64::from(l.size)).sum()
    }

    pub fn depth(&self, side: BookSide) -> usize {
        match side {
            BookSide::Bid => self.bids.len(),
            BookSide::Ask => self.asks.len(),
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    /// Updates discarded for staleness or invalid prices.
    pub fn rejects(&self) -> u64 {
        self.rejects
    }

    /// `best_bid < best_ask`, or one side empty.
    pub fn is_valid(&self) -> bool {
        let (bid, ask) = (self.best_bid(), self.best_ask());
        if bid > 0.0 && ask > 0.0 {
            bid < ask
        } else {
            !self.bids.is_empty() || !self.asks.is_empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn update(
        seq: u64,
        side: BookSide,
        update_type: BookUpdateType,
        price: f64,
        size: u32,
    ) -> OrderBookUpdate {
        OrderBookUpdate {
            symbol: Symbol::new("TEST"),
            update_type,
            side,
            price,
            size,
            order_count: 1,
            sequence: seq,
            exchange_timestamp: seq * 1000,
        }
    }

    fn snapshot_book() -> OrderBook {
        let mut book = OrderBook::new(Symbol::new("TEST"));
        book.apply_snapshot(
            &[Level::new(100.0, 10, 1), Level::new(99.0, 5, 1)],
            &[Level::new(101.0, 7, 1), Level::new(102.0, 3, 1)],
            1_000,
        );
        book
    }

    #[test]
    fn snapshot_assembly_and_queries() {
        let book = snapshot_book();
        assert_eq!(book.best_bid(), 100.0);
        assert_eq!(book.best_ask(), 101.0);
        assert_eq!(book.mid_price(), 100.5);
        assert_eq!(book.spread(), 1.0);
        let expected = (10.0 - 7.0) / 17.0;
        assert!((book.bid_ask_imbalance() - expected).abs() < 1e-12);
        assert!(book.is_valid());
    }

    #[test]
    fn out_of_sequence_update_is_discarded() {
        let mut book = snapshot_book();
        book.apply_update(&update(5, BookSide::Bid, BookUpdateType::Update, 100.0, 15))
            .unwrap();
        let err = book
            .apply_update(&update(4, BookSide::Bid, BookUpdateType::Update, 100.0, 1))
            .unwrap_err();
        assert!(matches!(err, BookError::StaleSequence { .. }));
        assert_eq!(book.bid_size_at_level(0), 15);
        assert_eq!(book.rejects(), 1);
        assert_eq!(book.last_sequence(), 5);
    }

    #[test]
    fn zero_size_write_deletes_level() {
        let mut book = snapshot_book();
        book.apply_update(&update(10, BookSide::Ask, BookUpdateType::Update, 101.0, 0))
            .unwrap();
        assert_eq!(book.best_ask(), 102.0);
        book.apply_update(&update(11, BookSide::Ask, BookUpdateType::Delete, 102.0, 0))
            .unwrap();
        assert_eq!(book.best_ask(), 0.0);
        assert_eq!(book.depth(BookSide::Ask), 0);
    }

    #[test]
    fn replace_semantics_not_additive() {
        let mut book = OrderBook::new(Symbol::new("TEST"));
        book.apply_update(&update(1, BookSide::Bid, BookUpdateType::Add, 50.0, 100))
            .unwrap();
        book.apply_update(&update(2, BookSide::Bid, BookUpdateType::Add, 50.0, 40))
            .unwrap();
        assert_eq!(book.bid_size_at_level(0), 40);
        assert_eq!(book.depth(BookSide::Bid), 1);
    }

    #[test]
    fn last_update_time_tracks_newest_applied() {
        let mut book = snapshot_book();
        assert_eq!(book.last_update_time(), 1_000);
        book.apply_update(&update(7, BookSide::Bid, BookUpdateType::Update, 99.5, 4))
            .unwrap();
        assert_eq!(book.last_update_time(), 7_000);
        // Rejected updates must not advance the timestamp.
        let _ = book.apply_update(&update(3, BookSide::Bid, BookUpdateType::Update, 99.5, 9));
        assert_eq!(book.last_update_time(), 7_000);
    }

    #[test]
    fn vwap_walks_levels() {
        let book = snapshot_book();
        // Buying 9 shares eats 7 @ 101 and 2 @ 102.
        let vwap = book.volume_weighted_price(BookSide::Ask, 9);
        let expected = (7.0 * 101.0 + 2.0 * 102.0) / 9.0;
        assert!((vwap - expected).abs() < 1e-9);

        let impact = book.market_impact(BookSide::Ask, 9);
        assert!((impact - (expected - 101.0) / 101.0).abs() < 1e-9);
    }

    #[test]
    fn vwap_on_empty_book_is_zero() {
        let book = OrderBook::new(Symbol::new("TEST"));
        assert_eq!(book.volume_weighted_price(BookSide::Ask, 100), 0.0);
        assert_eq!(book.market_impact(BookSide::Ask, 100), 0.0);
    }

    #[rstest]
    #[case(0, 10)]
    #[case(1, 5)]
    #[case(2, 0)]
    fn bid_sizes_by_level(#[case] level: usize, #[case] expected: u32) {
        assert_eq!(snapshot_book().bid_size_at_level(level), expected);
    }

    #[test]
    fn snapshot_drops_zero_size_levels() {
        let mut book = OrderBook::new(Symbol::new("TEST"));
        book.apply_snapshot(
            &[Level::new(100.0, 0, 1), Level::new(99.0, 5, 1)],
            &[],
            1,
        );
        assert_eq!(book.best_bid(), 99.0);
        assert_eq!(book.depth(BookSide::Bid), 1);
    }

    #[test]
    fn invalid_price_is_rejected() {
        let mut book = OrderBook::new(Symbol::new("TEST"));
        let err = book
            .apply_update(&update(1, BookSide::Bid, BookUpdateType::Add, 0.0, 10))
            .unwrap_err();
        assert_eq!(err, BookError::InvalidPrice);
        assert!(book.is_empty());
    }
}
