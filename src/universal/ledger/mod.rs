//! Shared bookkeeping for anything that opens and closes trades per symbol.
//!
//! Real positions (`PositionManager`) and simulated swarm trades
//! (`WorkerAgent`) are the same state machine: at most one open entry per
//! symbol, closed entries kept as history, identical P/L arithmetic.

pub mod book;
pub mod error;
pub mod pnl;

pub use book::*;
pub use error::*;
pub use pnl::*;
