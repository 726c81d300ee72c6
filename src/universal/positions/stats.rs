use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Position;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SymbolStats {
    pub trades: usize,
    pub wins: usize,
    pub pnl_usd: f64,
}

/// Aggregates over closed positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_pnl_usd: f64,
    pub total_pnl_percent: f64,
    pub best_trade_percent: Option<f64>,
    pub worst_trade_percent: Option<f64>,
    pub by_symbol: BTreeMap<String, SymbolStats>,
}

impl TradeStats {
    pub fn from_closed(closed: &[Position]) -> Self {
        let mut stats = TradeStats::default();
        for pos in closed.iter().filter(|p| !p.is_open()) {
            let pct = pos.realized_pnl_percent.unwrap_or(0.0);
            let usd = pos.realized_pnl_usd.unwrap_or(0.0);
            stats.total_trades += 1;
            if usd > 0.0 {
                stats.winning_trades += 1;
            } else {
                stats.losing_trades += 1;
            }
            stats.total_pnl_usd += usd;
            stats.total_pnl_percent += pct;
            stats.best_trade_percent = Some(stats.best_trade_percent.map_or(pct, |b| b.max(pct)));
            stats.worst_trade_percent = Some(stats.worst_trade_percent.map_or(pct, |w| w.min(pct)));

            let entry = stats.by_symbol.entry(pos.symbol.clone()).or_default();
            entry.trades += 1;
            entry.pnl_usd += usd;
            if usd > 0.0 {
                entry.wins += 1;
            }
        }
        stats
    }

    /// Win rate in percent, 0 with no trades.
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64 * 100.0
        }
    }
}
