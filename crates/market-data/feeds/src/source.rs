//! Source adapter seam

use common::MarketData;

/// A normalized tick source. Implementations include the mock generator,
/// the historical player, and (externally) vendor feed adapters.
pub trait FeedSource: Send {
    /// Produce the next tick, or `None` when nothing is available right
    /// now. Must not block longer than one poll interval.
    fn next_tick(&mut self) -> Option<MarketData>;

    /// True once the source will never produce again (end of file).
    /// Endless sources stay `false`.
    fn exhausted(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}
