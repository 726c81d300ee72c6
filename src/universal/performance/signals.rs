use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::config::PerformanceConfig;
use crate::universal::models::IndicatorSnapshot;

/// The four indicators whose entry signals are scored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Stochastic,
    BollingerBands,
    Macd,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 4] = [
        IndicatorKind::Rsi,
        IndicatorKind::Stochastic,
        IndicatorKind::BollingerBands,
        IndicatorKind::Macd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Stochastic => "stochastic",
            IndicatorKind::BollingerBands => "bollinger_bands",
            IndicatorKind::Macd => "macd",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bullish/neutral reading of each tracked indicator for one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSignals {
    pub rsi: bool,
    pub stochastic: bool,
    pub bollinger_bands: bool,
    pub macd: bool,
}

impl IndicatorSignals {
    /// RSI and %K oversold, price at or just above the lower band, MACD
    /// histogram turning positive. Missing readings are not bullish.
    pub fn from_snapshot(snap: &IndicatorSnapshot, previous: Option<&IndicatorSnapshot>, cfg: &PerformanceConfig) -> Self {
        let rsi = snap.rsi.is_finite() && snap.rsi < cfg.rsi_oversold;
        let stochastic = snap.stoch_k.is_finite() && snap.stoch_k < cfg.stochastic_oversold;
        let bollinger_bands =
            snap.bb_lower.is_finite() && snap.price <= snap.bb_lower * (1.0 + cfg.bb_tolerance_percent / 100.0);
        let macd = snap.macd_hist.is_finite()
            && snap.macd_hist > 0.0
            && previous
                .map(|p| !p.macd_hist.is_finite() || p.macd_hist <= 0.0)
                .unwrap_or(true);
        Self {
            rsi,
            stochastic,
            bollinger_bands,
            macd,
        }
    }

    pub fn get(&self, kind: IndicatorKind) -> bool {
        match kind {
            IndicatorKind::Rsi => self.rsi,
            IndicatorKind::Stochastic => self.stochastic,
            IndicatorKind::BollingerBands => self.bollinger_bands,
            IndicatorKind::Macd => self.macd,
        }
    }

    pub fn bullish_count(&self) -> usize {
        IndicatorKind::ALL.iter().filter(|k| self.get(**k)).count()
    }
}
