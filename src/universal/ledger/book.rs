use std::collections::HashMap;

use super::LedgerError;

/// An entry that can live in a [`TradeBook`].
pub trait LedgerEntry: Clone {
    fn symbol(&self) -> &str;
    fn is_open(&self) -> bool;
}

/// In-memory book of trades keyed by symbol.
///
/// Holds at most one open entry per symbol. Closed entries move to an
/// append-only history and are never mutated again, so reopening a symbol
/// always starts from a fresh entry.
#[derive(Debug, Clone)]
pub struct TradeBook<T: LedgerEntry> {
    open: HashMap<String, T>,
    history: Vec<T>,
}

impl<T: LedgerEntry> Default for TradeBook<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LedgerEntry> TradeBook<T> {
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Returns `Ok(())` if a new entry can be opened for `symbol`,
    /// or `Err(LedgerError::AlreadyOpen)` if one is already open.
    pub fn can_open(&self, symbol: &str) -> Result<(), LedgerError> {
        if self.has_open(symbol) {
            return Err(LedgerError::AlreadyOpen(symbol.to_string()));
        }
        Ok(())
    }

    /// Records a newly opened entry.
    pub fn record_open(&mut self, entry: T) -> Result<(), LedgerError> {
        self.can_open(entry.symbol())?;
        self.open.insert(entry.symbol().to_string(), entry);
        Ok(())
    }

    /// Applies `finalize` to the open entry for `symbol`, moves it to history
    /// and returns a copy of the closed entry.
    pub fn record_close<F>(&mut self, symbol: &str, finalize: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut T),
    {
        let mut entry = self
            .open
            .remove(symbol)
            .ok_or_else(|| LedgerError::NotOpen(symbol.to_string()))?;
        finalize(&mut entry);
        self.history.push(entry.clone());
        Ok(entry)
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.open.get(symbol).map(|e| e.is_open()).unwrap_or(false)
    }

    pub fn get_open(&self, symbol: &str) -> Option<&T> {
        self.open.get(symbol)
    }

    pub fn get_open_mut(&mut self, symbol: &str) -> Option<&mut T> {
        self.open.get_mut(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Open entries sorted by symbol.
    pub fn list_open(&self) -> Vec<T> {
        let mut entries: Vec<T> = self.open.values().cloned().collect();
        entries.sort_by(|a, b| a.symbol().cmp(b.symbol()));
        entries
    }

    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.open.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Closed entries in close order.
    pub fn history(&self) -> &[T] {
        &self.history
    }

    /// Replaces the closed history, used when restoring persisted state.
    pub fn restore_history(&mut self, history: Vec<T>) {
        self.history = history;
    }

    /// Removes the closed entries matching `expired` and returns them.
    pub fn prune_history<F>(&mut self, mut expired: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let (gone, kept): (Vec<T>, Vec<T>) = self.history.drain(..).partition(|e| expired(e));
        self.history = kept;
        gone
    }
}
