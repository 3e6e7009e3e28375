//! Market data sources and fan-out
//!
//! A [`source::FeedSource`] yields normalized ticks (live adapter, mock
//! generator, or historical file); the [`handler::MarketDataHandler`]
//! stamps and republishes them on the market-data topic with latency
//! accounting. Market data is loss-tolerant: on back-pressure ticks are
//! dropped and counted, never queued unboundedly.

pub mod csv;
pub mod handler;
pub mod mock;
pub mod source;

pub use csv::{FeedError, HistoricalDataPoint, load_csv};
pub use handler::MarketDataHandler;
pub use mock::MockFeed;
pub use source::FeedSource;
