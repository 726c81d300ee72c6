use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::strategy::{evaluate, StrategyParams, StrategyVariant};
use super::types::{AgentPerformance, AgentSnapshot, AgentTotals, PaperTrade, PaperTradeStatus, Vote};
use crate::universal::ledger::{self, TradeBook};
use crate::universal::models::IndicatorSnapshot;

pub const MIN_VOTE_WEIGHT: f64 = 0.1;
pub const MAX_VOTE_WEIGHT: f64 = 5.0;
const PAPER_ALLOCATION: f64 = 0.95;
const RETAINED_DAYS: i64 = 7;

/// One paper-trading strategy of the swarm.
///
/// Its vote is a pure function of the snapshot; the only state it carries
/// is its simulated balance and trades. Closed trades older than a week are
/// folded into lifetime totals and dropped.
#[derive(Debug, Clone)]
pub struct WorkerAgent {
    pub id: u32,
    pub strategy: StrategyVariant,
    pub params: StrategyParams,
    pub timeframe: String,
    initial_balance: f64,
    balance: f64,
    book: TradeBook<PaperTrade>,
    archived: AgentTotals,
    performance: AgentPerformance,
}

impl WorkerAgent {
    pub fn new(id: u32, strategy: StrategyVariant, params: StrategyParams, timeframe: &str, initial_balance: f64) -> Self {
        let mut agent = Self {
            id,
            strategy,
            params,
            timeframe: timeframe.to_string(),
            initial_balance,
            balance: initial_balance,
            book: TradeBook::new(),
            archived: AgentTotals::default(),
            performance: AgentPerformance::default(),
        };
        agent.update_vote_weight(Utc::now());
        agent
    }

    /// Rebuilds an agent from its persisted form.
    pub fn from_snapshot(snapshot: AgentSnapshot, initial_balance: f64) -> Self {
        let mut book = TradeBook::new();
        book.restore_history(snapshot.closed_trades);
        for trade in snapshot.open_trades {
            let _ = book.record_open(trade);
        }
        let mut agent = Self {
            id: snapshot.id,
            strategy: snapshot.strategy,
            params: snapshot.params,
            timeframe: snapshot.timeframe,
            initial_balance,
            balance: snapshot.balance,
            book,
            archived: snapshot.archived,
            performance: AgentPerformance::default(),
        };
        agent.update_vote_weight(Utc::now());
        agent
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            strategy: self.strategy,
            params: self.params.clone(),
            timeframe: self.timeframe.clone(),
            balance: self.balance,
            open_trades: self.book.list_open(),
            closed_trades: self.book.history().to_vec(),
            archived: self.archived,
        }
    }

    pub fn vote(&self, snapshot: &IndicatorSnapshot) -> Vote {
        evaluate(self.strategy, snapshot, &self.params)
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn performance(&self) -> &AgentPerformance {
        &self.performance
    }

    pub fn vote_weight(&self) -> f64 {
        self.performance.vote_weight
    }

    pub fn open_trade(&self, symbol: &str) -> Option<&PaperTrade> {
        self.book.get_open(symbol)
    }

    pub fn open_trade_count(&self) -> usize {
        self.book.open_count()
    }

    /// Closed trades still inside the seven-day window.
    pub fn closed_trades(&self) -> &[PaperTrade] {
        self.book.history()
    }

    fn refresh_performance(&mut self, now: DateTime<Utc>) {
        let day = now - Duration::hours(24);
        let week = now - Duration::days(RETAINED_DAYS);
        let expired = self
            .book
            .prune_history(|t| t.exit_time.map(|x| x <= week).unwrap_or(false));
        for trade in &expired {
            self.archived.absorb(trade);
        }

        let closed = self.book.history();
        let window = |since: DateTime<Utc>| -> f64 {
            closed
                .iter()
                .filter(|t| t.exit_time.map(|x| x > since).unwrap_or(false))
                .map(|t| t.profit_loss)
                .sum()
        };

        let total = self.archived.total_trades + closed.len();
        let wins = self.archived.winning_trades + closed.iter().filter(|t| t.profit_loss > 0.0).count();
        let profit = self.archived.total_profit + closed.iter().map(|t| t.profit_loss).sum::<f64>();
        let perf = &mut self.performance;
        perf.total_trades = total;
        perf.winning_trades = wins;
        perf.losing_trades = total - wins;
        perf.total_profit = profit;
        perf.win_rate = if total > 0 { wins as f64 / total as f64 * 100.0 } else { 0.0 };
        perf.roi = if self.initial_balance > 0.0 {
            (self.balance - self.initial_balance) / self.initial_balance * 100.0
        } else {
            0.0
        };
        perf.last_24h_profit = window(day);
        perf.last_7d_profit = window(week);
    }

    /// Recomputes performance as of `now` and derives the vote weight.
    ///
    /// Base 1.0, plus `min(p24/100, 3)` on a 24h profit or shrunk by
    /// `p24/100` (floor 0.1) on a loss; x1.2 above 60% win rate, x0.8 below
    /// 40%; x0.5 with fewer than five trades; clamped to [0.1, 5.0].
    pub fn update_vote_weight(&mut self, now: DateTime<Utc>) -> f64 {
        self.refresh_performance(now);
        let perf = &mut self.performance;

        let mut weight: f64 = 1.0;
        if perf.last_24h_profit > 0.0 {
            weight += (perf.last_24h_profit / 100.0).min(3.0);
        } else if perf.last_24h_profit < 0.0 {
            weight = (weight + perf.last_24h_profit / 100.0).max(MIN_VOTE_WEIGHT);
        }
        if perf.win_rate > 60.0 {
            weight *= 1.2;
        } else if perf.win_rate < 40.0 {
            weight *= 0.8;
        }
        if perf.total_trades < 5 {
            weight *= 0.5;
        }
        perf.vote_weight = weight.clamp(MIN_VOTE_WEIGHT, MAX_VOTE_WEIGHT);
        perf.vote_weight
    }

    /// Applies `vote` to the paper book at `price`.
    ///
    /// BUY opens a trade with 95% of the balance when none is open for the
    /// symbol; SELL closes the open one. Returns the trade that changed.
    pub fn paper_trade(&mut self, symbol: &str, vote: Vote, price: f64, now: DateTime<Utc>) -> Option<PaperTrade> {
        if !(price > 0.0) {
            return None;
        }
        match vote {
            Vote::Buy if self.book.can_open(symbol).is_ok() => {
                let quantity = self.balance * PAPER_ALLOCATION / price;
                if !(quantity > 0.0) {
                    return None;
                }
                let trade = PaperTrade {
                    agent_id: self.id,
                    symbol: symbol.to_string(),
                    entry_price: price,
                    quantity,
                    entry_time: now,
                    exit_price: None,
                    exit_time: None,
                    profit_loss: 0.0,
                    profit_percent: 0.0,
                    status: PaperTradeStatus::Open,
                };
                self.book.record_open(trade.clone()).ok()?;
                self.balance -= quantity * price;
                debug!(agent = self.id, symbol, price, "paper buy");
                Some(trade)
            }
            Vote::Sell if self.book.has_open(symbol) => {
                let closed = self
                    .book
                    .record_close(symbol, |t| {
                        let pct = ledger::directional_profit_percent(1.0, t.entry_price, price);
                        t.exit_price = Some(price);
                        t.exit_time = Some(now);
                        t.profit_percent = pct;
                        t.profit_loss = ledger::pnl_usd(t.entry_price, t.quantity, 1, pct);
                        t.status = PaperTradeStatus::Closed;
                    })
                    .ok()?;
                self.balance += closed.quantity * price;
                self.refresh_performance(now);
                debug!(agent = self.id, symbol, price, pnl = closed.profit_loss, "paper sell");
                Some(closed)
            }
            _ => None,
        }
    }
}
