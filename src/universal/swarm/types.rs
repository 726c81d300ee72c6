use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::{StrategyParams, StrategyVariant};
use crate::universal::ledger::LedgerEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Vote::Buy => "BUY",
            Vote::Sell => "SELL",
            Vote::Hold => "HOLD",
        })
    }
}

/// One aggregated swarm decision. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwarmVote {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub total_agents: usize,
    pub buy_votes: usize,
    pub sell_votes: usize,
    pub hold_votes: usize,
    pub buy_weight: f64,
    pub sell_weight: f64,
    pub hold_weight: f64,
    pub final_decision: Vote,
    /// Share of total weight behind `final_decision`, 0-100.
    pub confidence: f64,
    pub top_performers: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PaperTradeStatus {
    Open,
    Closed,
}

/// Simulated long trade of one agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperTrade {
    pub agent_id: u32,
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub profit_loss: f64,
    pub profit_percent: f64,
    pub status: PaperTradeStatus,
}

impl LedgerEntry for PaperTrade {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn is_open(&self) -> bool {
        self.status == PaperTradeStatus::Open
    }
}

/// Performance figures derived from an agent's closed trades.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_profit: f64,
    /// Percent, 0 without trades.
    pub win_rate: f64,
    pub roi: f64,
    pub last_24h_profit: f64,
    pub last_7d_profit: f64,
    pub vote_weight: f64,
}

/// Running totals of closed trades that aged out of the retained window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTotals {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub total_profit: f64,
}

impl AgentTotals {
    pub fn absorb(&mut self, trade: &PaperTrade) {
        self.total_trades += 1;
        if trade.profit_loss > 0.0 {
            self.winning_trades += 1;
        }
        self.total_profit += trade.profit_loss;
    }
}

/// Persisted form of an agent. The vote weight is not part of it; it is
/// recomputed from `closed_trades` and `archived` after a restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: u32,
    pub strategy: StrategyVariant,
    pub params: StrategyParams,
    pub timeframe: String,
    pub balance: f64,
    pub open_trades: Vec<PaperTrade>,
    /// Trades closed within the last seven days.
    pub closed_trades: Vec<PaperTrade>,
    #[serde(default)]
    pub archived: AgentTotals,
}
