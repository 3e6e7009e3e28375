//! Historical data file loading
//!
//! Format: one header row, then
//! `timestamp_ms,symbol,open,high,low,close,volume,bid,ask`. Missing bid
//! or ask cells default to `close * 0.999` / `close * 1.001`; rows with
//! unparseable numerics are skipped with a warning and counted.

use common::{MarketData, Symbol};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{path} contains no usable rows")]
    Empty { path: String },
}

/// One bar/quote row from a historical file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistoricalDataPoint {
    pub timestamp_ms: u64,
    pub symbol: Symbol,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub bid: f64,
    pub ask: f64,
}

impl HistoricalDataPoint {
    /// Convert to the live wire format, splitting volume across the touch.
    pub fn to_market_data(&self) -> MarketData {
        MarketData {
            symbol: self.symbol,
            bid_price: self.bid,
            ask_price: self.ask,
            bid_size: (self.volume / 2).min(u64::from(u32::MAX)) as u32,
            ask_size: (self.volume / 2).min(u64::from(u32::MAX)) as u32,
            last_price: self.close,
            last_size: self.volume.min(u64::from(u32::MAX)) as u32,
            exchange_timestamp: self.timestamp_ms * 1_000_000,
        }
    }
}

/// Load, parse and sort a historical CSV file. Returns the rows in
/// timestamp order along with the number of rows skipped.
pub fn load_csv(path: impl AsRef<Path>) -> Result<(Vec<HistoricalDataPoint>, u64), FeedError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| FeedError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let mut rows = Vec::new();
    let mut skipped = 0u64;
    for (idx, result) in reader.records().enumerate() {
        // Records start after the header, so data row 0 is file line 2.
        let line = idx + 2;
        match result {
            Ok(record) => match parse_record(&record) {
                Some(point) => rows.push(point),
                None => {
                    skipped += 1;
                    warn!(line, row = ?record, "skipping unparseable row");
                }
            },
            Err(err) => {
                skipped += 1;
                warn!(line, %err, "skipping malformed row");
            }
        }
    }

    if rows.is_empty() {
        return Err(FeedError::Empty {
            path: path.display().to_string(),
        });
    }

    rows.sort_by_key(|r| r.timestamp_ms);
    info!(
        path = %path.display(),
        rows = rows.len(),
        skipped,
        first_ts = rows.first().map(|r| r.timestamp_ms),
        last_ts = rows.last().map(|r| r.timestamp_ms),
        "historical data loaded"
    );
    Ok((rows, skipped))
}

fn parse_record(record: &csv::StringRecord) -> Option<HistoricalDataPoint> {
    let timestamp_ms: u64 = record.get(0)?.parse().ok()?;
    let symbol = record.get(1).filter(|s| !s.is_empty())?;
    let open: f64 = record.get(2)?.parse().ok()?;
    let high: f64 = record.get(3)?.parse().ok()?;
    let low: f64 = record.get(4)?.parse().ok()?;
    let close: f64 = record.get(5)?.parse().ok()?;
    let volume: u64 = record.get(6)?.parse().ok()?;

    let bid = match record.get(7) {
        Some(cell) if !cell.is_empty() && cell != "null" => cell.parse().ok()?,
        _ => close * 0.999,
    };
    let ask = match record.get(8) {
        Some(cell) if !cell.is_empty() && cell != "null" => cell.parse().ok()?,
        _ => close * 1.001,
    };

    Some(HistoricalDataPoint {
        timestamp_ms,
        symbol: Symbol::new(symbol),
        open,
        high,
        low,
        close,
        volume,
        bid,
        ask,
    })
}
