use std::fmt;

/// Errors raised by a [`TradeBook`](super::TradeBook).
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// There is already an open entry for the given symbol.
    AlreadyOpen(String),
    /// There is no open entry for the given symbol.
    NotOpen(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::AlreadyOpen(symbol) => write!(f, "Entry already open for symbol={}", symbol),
            LedgerError::NotOpen(symbol) => write!(f, "No open entry for symbol={}", symbol),
        }
    }
}

impl std::error::Error for LedgerError {}
