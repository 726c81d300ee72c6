//! The fixed rule set of the swarm.
//!
//! Every rule is a pure function of the snapshot and the agent's
//! thresholds. Missing readings fall back to neutral values (RSI 50,
//! %K 50, volume ratio 1) or simply fail the comparison, which yields HOLD.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::Vote;
use crate::universal::models::{or_default, IndicatorSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyVariant {
    RsiOnly,
    MacdOnly,
    StochOnly,
    BbOnly,
    EmaCross,
    VolumeSpike,
    RsiStoch,
    MacdBb,
    TripleEma,
    Momentum,
    MeanReversion,
    Breakout,
    TrendFollow,
    Volatility,
    MultiIndicator,
}

impl StrategyVariant {
    pub const ALL: [StrategyVariant; 15] = [
        StrategyVariant::RsiOnly,
        StrategyVariant::MacdOnly,
        StrategyVariant::StochOnly,
        StrategyVariant::BbOnly,
        StrategyVariant::EmaCross,
        StrategyVariant::VolumeSpike,
        StrategyVariant::RsiStoch,
        StrategyVariant::MacdBb,
        StrategyVariant::TripleEma,
        StrategyVariant::Momentum,
        StrategyVariant::MeanReversion,
        StrategyVariant::Breakout,
        StrategyVariant::TrendFollow,
        StrategyVariant::Volatility,
        StrategyVariant::MultiIndicator,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyVariant::RsiOnly => "rsi_only",
            StrategyVariant::MacdOnly => "macd_only",
            StrategyVariant::StochOnly => "stoch_only",
            StrategyVariant::BbOnly => "bb_only",
            StrategyVariant::EmaCross => "ema_cross",
            StrategyVariant::VolumeSpike => "volume_spike",
            StrategyVariant::RsiStoch => "rsi_stoch",
            StrategyVariant::MacdBb => "macd_bb",
            StrategyVariant::TripleEma => "triple_ema",
            StrategyVariant::Momentum => "momentum",
            StrategyVariant::MeanReversion => "mean_reversion",
            StrategyVariant::Breakout => "breakout",
            StrategyVariant::TrendFollow => "trend_follow",
            StrategyVariant::Volatility => "volatility",
            StrategyVariant::MultiIndicator => "multi_indicator",
        }
    }
}

impl fmt::Display for StrategyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-agent thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub rsi_buy: f64,
    pub rsi_sell: f64,
    pub stoch_buy: f64,
    pub stoch_sell: f64,
    pub volume_threshold: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_buy: 30.0,
            rsi_sell: 70.0,
            stoch_buy: 20.0,
            stoch_sell: 80.0,
            volume_threshold: 1.5,
        }
    }
}

impl StrategyParams {
    /// Thresholds of the `index`-th agent of a generated population.
    pub fn for_index(index: usize) -> Self {
        Self {
            rsi_buy: 20.0 + (index % 5) as f64 * 2.0,
            rsi_sell: 70.0 + (index % 5) as f64 * 2.0,
            stoch_buy: 15.0 + (index % 4) as f64 * 3.0,
            stoch_sell: 75.0 + (index % 4) as f64 * 3.0,
            volume_threshold: 1.2 + (index % 6) as f64 * 0.1,
        }
    }
}

fn vote_if(buy: bool, sell: bool) -> Vote {
    if buy {
        Vote::Buy
    } else if sell {
        Vote::Sell
    } else {
        Vote::Hold
    }
}

fn rsi_only(s: &IndicatorSnapshot, p: &StrategyParams) -> Vote {
    let rsi = or_default(s.rsi, 50.0);
    vote_if(rsi < p.rsi_buy, rsi > p.rsi_sell)
}

fn macd_only(s: &IndicatorSnapshot) -> Vote {
    let (m, sig) = (or_default(s.macd, 0.0), or_default(s.macd_signal, 0.0));
    vote_if(m > sig && m < 0.0, m < sig && m > 0.0)
}

fn stoch_only(s: &IndicatorSnapshot, p: &StrategyParams) -> Vote {
    let k = or_default(s.stoch_k, 50.0);
    vote_if(k < p.stoch_buy, k > p.stoch_sell)
}

/// Evaluates `variant` on `snap`.
pub fn evaluate(variant: StrategyVariant, snap: &IndicatorSnapshot, p: &StrategyParams) -> Vote {
    let price = snap.price;
    match variant {
        StrategyVariant::RsiOnly => rsi_only(snap, p),
        StrategyVariant::MacdOnly => macd_only(snap),
        StrategyVariant::StochOnly => stoch_only(snap, p),
        StrategyVariant::BbOnly => vote_if(price <= snap.bb_lower, price >= snap.bb_upper),
        StrategyVariant::EmaCross => vote_if(snap.ema_9 > snap.ema_21, snap.ema_9 < snap.ema_21),
        StrategyVariant::VolumeSpike => {
            let vr = or_default(snap.volume_ratio, 1.0);
            let change = or_default(snap.price_change_pct, 0.0);
            let spike = vr > p.volume_threshold;
            vote_if(spike && change > 0.0, spike && change < -2.0)
        }
        StrategyVariant::RsiStoch => {
            let rsi = or_default(snap.rsi, 50.0);
            let k = or_default(snap.stoch_k, 50.0);
            vote_if(rsi < 35.0 && k < 25.0, rsi > 65.0 && k > 75.0)
        }
        StrategyVariant::MacdBb => {
            let bullish = or_default(snap.macd, 0.0) > or_default(snap.macd_signal, 0.0);
            vote_if(bullish && price <= snap.bb_lower * 1.01, false)
        }
        StrategyVariant::TripleEma => {
            let (e9, e21, e50) = (snap.ema_9, snap.ema_21, snap.ema_50);
            vote_if(e9 > e21 && e21 > e50, e9 < e21 && e21 < e50)
        }
        StrategyVariant::Momentum => {
            let roc = or_default(snap.rate_of_change, 0.0);
            let rsi = or_default(snap.rsi, 50.0);
            vote_if(roc > 2.0 && rsi > 45.0 && rsi < 70.0, roc < -2.0 && rsi < 55.0)
        }
        StrategyVariant::MeanReversion => {
            if !(snap.sma_20 > 0.0) {
                return Vote::Hold;
            }
            let deviation = (price - snap.sma_20) / snap.sma_20 * 100.0;
            vote_if(deviation < -3.0, deviation > 3.0)
        }
        StrategyVariant::Breakout => {
            let vr = or_default(snap.volume_ratio, 1.0);
            vote_if(price > snap.high_20 && vr > 1.3, price < snap.low_20 && vr > 1.3)
        }
        StrategyVariant::TrendFollow => {
            let strong = snap.adx > 25.0;
            vote_if(
                strong && snap.ema_50 > snap.ema_200 && price > snap.ema_50,
                strong && snap.ema_50 < snap.ema_200 && price < snap.ema_50,
            )
        }
        StrategyVariant::Volatility => {
            vote_if(snap.atr < snap.atr_avg * 0.7 && snap.bb_width() < 0.02, false)
        }
        StrategyVariant::MultiIndicator => {
            let votes = [rsi_only(snap, p), macd_only(snap), stoch_only(snap, p)];
            let buys = votes.iter().filter(|v| **v == Vote::Buy).count();
            let sells = votes.iter().filter(|v| **v == Vote::Sell).count();
            vote_if(buys >= 2, sells >= 2)
        }
    }
}
