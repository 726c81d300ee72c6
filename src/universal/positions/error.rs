use std::fmt;

use crate::universal::ledger::LedgerError;

/// Reasons the position manager refuses a state change.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    /// There is already an open position for the symbol.
    AlreadyOpen(String),
    /// There is no open position for the symbol.
    NotOpen(String),
    /// The portfolio-wide open position cap is reached.
    MaxPositions { open: usize, max: usize },
    /// The stop-loss would trigger too close to (or past) liquidation.
    LiquidationBuffer {
        symbol: String,
        stop_loss_price: f64,
        liquidation_price: f64,
        required_stop_price: f64,
    },
    /// The request itself is malformed (non-positive price, quantity, leverage).
    InvalidRequest(String),
    /// A generic internal error.
    Internal(String),
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionError::AlreadyOpen(symbol) => write!(f, "Position already open for symbol={}", symbol),
            PositionError::NotOpen(symbol) => write!(f, "No open position for symbol={}", symbol),
            PositionError::MaxPositions { open, max } => {
                write!(f, "Max positions reached ({}/{})", open, max)
            }
            PositionError::LiquidationBuffer { symbol, stop_loss_price, liquidation_price, required_stop_price } => write!(
                f,
                "Stop-loss too close to liquidation for symbol={}: stop={:.4}, liquidation={:.4}, required={:.4}",
                symbol, stop_loss_price, liquidation_price, required_stop_price
            ),
            PositionError::InvalidRequest(msg) => write!(f, "Invalid open request: {}", msg),
            PositionError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for PositionError {}

impl From<LedgerError> for PositionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyOpen(symbol) => PositionError::AlreadyOpen(symbol),
            LedgerError::NotOpen(symbol) => PositionError::NotOpen(symbol),
        }
    }
}
