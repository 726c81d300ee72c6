//! Paper-trading strategy population and its weighted vote.

pub mod agent;
pub mod coordinator;
pub mod strategy;
pub mod types;

pub use agent::*;
pub use coordinator::*;
pub use strategy::*;
pub use types::*;
