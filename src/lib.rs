//! Swarm-voting spot/futures trading bot.
//!
//! `common` holds configuration, logging and exchange access; `universal`
//! holds the trading core: positions, the swarm, indicator performance,
//! regime and causal filtering, persistence and the polling engine.

pub mod common;
pub mod universal;

pub use common::config::BotConfig;
pub use universal::engine::{TradingContext, TradingEngine};
pub use universal::positions::{PositionManager, RiskSettings};
pub use universal::swarm::SwarmCoordinator;
