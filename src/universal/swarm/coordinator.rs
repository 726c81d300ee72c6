use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::agent::WorkerAgent;
use super::strategy::{StrategyParams, StrategyVariant};
use super::types::{AgentPerformance, AgentSnapshot, PaperTrade, PaperTradeStatus, SwarmVote, Vote};
use crate::common::config::SwarmConfig;
use crate::universal::models::IndicatorSnapshot;

const TIMEFRAMES: [&str; 4] = ["5m", "15m", "1h", "4h"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: u32,
    pub strategy: StrategyVariant,
    pub roi: f64,
    pub total_profit: f64,
    pub last_24h_profit: f64,
    pub win_rate: f64,
    pub vote_weight: f64,
}

impl AgentSummary {
    fn of(agent: &WorkerAgent) -> Self {
        let p = agent.performance();
        Self {
            id: agent.id,
            strategy: agent.strategy,
            roi: p.roi,
            total_profit: p.total_profit,
            last_24h_profit: p.last_24h_profit,
            win_rate: p.win_rate,
            vote_weight: p.vote_weight,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwarmStats {
    pub total_agents: usize,
    pub total_profit: f64,
    pub avg_balance: f64,
    pub profitable_agents: usize,
    pub profitability_rate: f64,
    pub best: Option<AgentSummary>,
    pub worst: Option<AgentSummary>,
    pub top_10: Vec<AgentSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDetails {
    pub id: u32,
    pub strategy: StrategyVariant,
    pub timeframe: String,
    pub balance: f64,
    pub performance: AgentPerformance,
    pub open_trades: usize,
    pub closed_trades: usize,
}

/// Trades opened and closed by one paper-trading cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PaperCycleReport {
    pub opened: Vec<PaperTrade>,
    pub closed: Vec<PaperTrade>,
}

/// Fixed population of [`WorkerAgent`]s voting with performance weights.
pub struct SwarmCoordinator {
    agents: Vec<WorkerAgent>,
    initial_balance: f64,
    top_performers: usize,
    history: VecDeque<SwarmVote>,
    history_limit: usize,
}

impl SwarmCoordinator {
    /// Generates the standard population: strategies and timeframes cycle
    /// with the agent index, thresholds vary per index.
    pub fn new(cfg: &SwarmConfig) -> Self {
        let agents = (0..cfg.population)
            .map(|i| {
                WorkerAgent::new(
                    i as u32 + 1,
                    StrategyVariant::ALL[i % StrategyVariant::ALL.len()],
                    StrategyParams::for_index(i),
                    TIMEFRAMES[i % TIMEFRAMES.len()],
                    cfg.initial_balance,
                )
            })
            .collect();
        info!(population = cfg.population, "swarm initialised");
        Self::with_agents(agents, cfg)
    }

    pub fn with_agents(agents: Vec<WorkerAgent>, cfg: &SwarmConfig) -> Self {
        Self {
            agents,
            initial_balance: cfg.initial_balance,
            top_performers: cfg.top_performers,
            history: VecDeque::new(),
            history_limit: cfg.history_limit.max(1),
        }
    }

    pub fn agents(&self) -> &[WorkerAgent] {
        &self.agents
    }

    pub fn conduct_vote(&mut self, symbol: &str, snapshot: &IndicatorSnapshot) -> SwarmVote {
        self.conduct_vote_at(symbol, snapshot, Utc::now())
    }

    /// Weighted vote of the whole population as of `now`.
    ///
    /// Every agent's weight is refreshed first. The decision is the bucket
    /// with the largest weight share (ties resolve BUY, SELL, HOLD) and the
    /// confidence is that share in percent. Zero total weight is HOLD at 0.
    pub fn conduct_vote_at(&mut self, symbol: &str, snapshot: &IndicatorSnapshot, now: DateTime<Utc>) -> SwarmVote {
        let (mut buy_votes, mut sell_votes, mut hold_votes) = (0usize, 0usize, 0usize);
        let (mut buy_weight, mut sell_weight, mut hold_weight) = (0.0f64, 0.0f64, 0.0f64);

        for agent in self.agents.iter_mut() {
            let weight = agent.update_vote_weight(now);
            match agent.vote(snapshot) {
                Vote::Buy => {
                    buy_votes += 1;
                    buy_weight += weight;
                }
                Vote::Sell => {
                    sell_votes += 1;
                    sell_weight += weight;
                }
                Vote::Hold => {
                    hold_votes += 1;
                    hold_weight += weight;
                }
            }
        }

        let total = buy_weight + sell_weight + hold_weight;
        let (final_decision, confidence) = if total <= 0.0 {
            (Vote::Hold, 0.0)
        } else {
            let buy = buy_weight / total * 100.0;
            let sell = sell_weight / total * 100.0;
            let hold = hold_weight / total * 100.0;
            if buy >= sell && buy >= hold {
                (Vote::Buy, buy)
            } else if sell >= hold {
                (Vote::Sell, sell)
            } else {
                (Vote::Hold, hold)
            }
        };

        let vote = SwarmVote {
            symbol: symbol.to_string(),
            timestamp: now,
            total_agents: self.agents.len(),
            buy_votes,
            sell_votes,
            hold_votes,
            buy_weight,
            sell_weight,
            hold_weight,
            final_decision,
            confidence,
            top_performers: self.ranked_by_recent_profit(self.top_performers).iter().map(|a| a.id).collect(),
        };

        info!(
            symbol,
            decision = %vote.final_decision,
            confidence = vote.confidence,
            buy = buy_votes,
            sell = sell_votes,
            hold = hold_votes,
            "swarm vote"
        );
        self.history.push_back(vote.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        vote
    }

    pub fn run_paper_trading_cycle(&mut self, symbol: &str, snapshot: &IndicatorSnapshot) -> PaperCycleReport {
        self.run_paper_trading_cycle_at(symbol, snapshot, Utc::now())
    }

    /// Lets every agent act on its own vote with simulated money.
    pub fn run_paper_trading_cycle_at(
        &mut self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
        now: DateTime<Utc>,
    ) -> PaperCycleReport {
        let mut report = PaperCycleReport::default();
        if !(snapshot.price > 0.0) {
            return report;
        }
        for agent in self.agents.iter_mut() {
            let vote = agent.vote(snapshot);
            if let Some(trade) = agent.paper_trade(symbol, vote, snapshot.price, now) {
                match trade.status {
                    PaperTradeStatus::Open => report.opened.push(trade),
                    PaperTradeStatus::Closed => report.closed.push(trade),
                }
            }
        }
        if !report.opened.is_empty() || !report.closed.is_empty() {
            info!(
                symbol,
                opened = report.opened.len(),
                closed = report.closed.len(),
                "paper trading cycle"
            );
        }
        report
    }

    fn ranked_by_recent_profit(&self, n: usize) -> Vec<&WorkerAgent> {
        let mut ranked: Vec<&WorkerAgent> = self.agents.iter().collect();
        ranked.sort_by(|a, b| {
            b.performance()
                .last_24h_profit
                .total_cmp(&a.performance().last_24h_profit)
        });
        ranked.truncate(n);
        ranked
    }

    pub fn stats(&self) -> SwarmStats {
        let n = self.agents.len();
        let total_profit = self.agents.iter().map(|a| a.performance().total_profit).sum();
        let avg_balance = if n > 0 {
            self.agents.iter().map(|a| a.balance()).sum::<f64>() / n as f64
        } else {
            0.0
        };
        let profitable = self.agents.iter().filter(|a| a.performance().total_profit > 0.0).count();
        let by_roi = |a: &&WorkerAgent, b: &&WorkerAgent| a.performance().roi.total_cmp(&b.performance().roi);
        SwarmStats {
            total_agents: n,
            total_profit,
            avg_balance,
            profitable_agents: profitable,
            profitability_rate: if n > 0 { profitable as f64 / n as f64 * 100.0 } else { 0.0 },
            best: self.agents.iter().max_by(by_roi).map(AgentSummary::of),
            worst: self.agents.iter().min_by(by_roi).map(AgentSummary::of),
            top_10: self.ranked_by_recent_profit(10).into_iter().map(AgentSummary::of).collect(),
        }
    }

    pub fn agent_details(&self, id: u32) -> Option<AgentDetails> {
        let agent = self.agents.iter().find(|a| a.id == id)?;
        Some(AgentDetails {
            id: agent.id,
            strategy: agent.strategy,
            timeframe: agent.timeframe.clone(),
            balance: agent.balance(),
            performance: agent.performance().clone(),
            open_trades: agent.open_trade_count(),
            closed_trades: agent.performance().total_trades,
        })
    }

    /// Recorded votes, oldest first.
    pub fn history(&self) -> Vec<SwarmVote> {
        self.history.iter().cloned().collect()
    }

    pub fn last_vote(&self, symbol: &str) -> Option<&SwarmVote> {
        self.history.iter().rev().find(|v| v.symbol == symbol)
    }

    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        self.agents.iter().map(|a| a.snapshot()).collect()
    }

    /// Replaces agents whose id appears in `snapshots`. Unknown ids are ignored.
    pub fn restore(&mut self, snapshots: Vec<AgentSnapshot>) -> usize {
        let mut restored = 0;
        for snap in snapshots {
            if let Some(slot) = self.agents.iter_mut().find(|a| a.id == snap.id) {
                *slot = WorkerAgent::from_snapshot(snap, self.initial_balance);
                restored += 1;
            }
        }
        info!(restored, "restored swarm agents");
        restored
    }
}
