//! Multi-symbol book management

use common::{OrderBookUpdate, Symbol};
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::book::{BookError, OrderBook};

/// Owns one [`OrderBook`] per symbol, creating books lazily as updates
/// arrive. Single-threaded by design; the owning service routes every
/// update through its processing thread.
#[derive(Debug, Default)]
pub struct BookManager {
    books: FxHashMap<Symbol, OrderBook>,
    rejects: u64,
}

impl BookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> &mut OrderBook {
        self.books
            .entry(symbol)
            .or_insert_with(|| OrderBook::new(symbol))
    }

    pub fn book(&self, symbol: &Symbol) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    pub fn book_mut(&mut self, symbol: &Symbol) -> Option<&mut OrderBook> {
        self.books.get_mut(symbol)
    }

    /// Route an update to its symbol's book, creating it on first sight.
    pub fn process_update(&mut self, update: &OrderBookUpdate) -> Result<(), BookError> {
        let result = self
            .books
            .entry(update.symbol)
            .or_insert_with(|| OrderBook::new(update.symbol))
            .apply_update(update);
        if let Err(err) = &result {
            self.rejects += 1;
            trace!(symbol = %update.symbol, %err, "book update rejected");
        }
        result
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.books.keys().copied().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Total updates discarded across all books.
    pub fn rejects(&self) -> u64 {
        self.rejects
    }
}
