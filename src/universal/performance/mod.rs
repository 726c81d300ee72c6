//! Per-indicator signal history and the weights learned from it.

pub mod signals;
pub mod tracker;

pub use signals::*;
pub use tracker::*;
