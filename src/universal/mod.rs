pub mod causal;
pub mod engine;
pub mod gates;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod momentum;
pub mod notify;
pub mod performance;
pub mod positions;
pub mod regime;
pub mod store;
pub mod swarm;
pub mod telegram;
