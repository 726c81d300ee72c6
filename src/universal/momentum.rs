//! Composite momentum index, 0-100. Low readings are the buy zone.
//!
//! Three component scores rate how attractive a long entry looks (higher is
//! better): oscillators, volume surge, and strength against a reference
//! symbol. The index is 100 minus their weighted mean. A component without
//! data scores a neutral 50.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::IndicatorSnapshot;
use crate::common::config::MomentumConfig;

const NEUTRAL: f64 = 50.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MomentumReading {
    pub index: f64,
    pub technical: f64,
    pub volume: f64,
    pub relative_strength: f64,
}

#[derive(Clone, Debug)]
pub struct MomentumIndex {
    pub enabled: bool,
    pub technical_weight: f64,
    pub volume_weight: f64,
    pub relative_strength_weight: f64,
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub strong_momentum_threshold: f64,
    pub reference_symbol: String,
}

impl MomentumIndex {
    pub fn from_config(cfg: &MomentumConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            technical_weight: cfg.technical_weight,
            volume_weight: cfg.volume_weight,
            relative_strength_weight: cfg.relative_strength_weight,
            buy_threshold: cfg.buy_threshold,
            sell_threshold: cfg.sell_threshold,
            strong_momentum_threshold: cfg.strong_momentum_threshold,
            reference_symbol: cfg.reference_symbol.clone(),
        }
    }

    /// Scores `snap`, measuring relative strength against `reference` (the
    /// latest snapshot of the reference symbol). `None` when disabled.
    pub fn compute(&self, snap: &IndicatorSnapshot, reference: Option<&IndicatorSnapshot>) -> Option<MomentumReading> {
        if !self.enabled {
            return None;
        }
        let total = self.technical_weight + self.volume_weight + self.relative_strength_weight;
        if !(total > 0.0) {
            return None;
        }

        let technical = technical_score(snap);
        let volume = volume_score(snap.volume_ratio);
        let relative_strength = match reference {
            Some(r) if snap.symbol != self.reference_symbol => {
                relative_strength_score(snap.rate_of_change, r.rate_of_change)
            }
            _ => NEUTRAL,
        };
        let attractiveness = (technical * self.technical_weight
            + volume * self.volume_weight
            + relative_strength * self.relative_strength_weight)
            / total;
        let index = (100.0 - attractiveness).clamp(0.0, 100.0);

        info!(symbol = %snap.symbol, index, technical, volume, relative_strength, "momentum index");
        Some(MomentumReading {
            index,
            technical,
            volume,
            relative_strength,
        })
    }

    pub fn should_buy(&self, index: f64) -> bool {
        index < self.buy_threshold
    }

    pub fn should_sell(&self, index: f64) -> bool {
        index > self.sell_threshold
    }

    /// Momentum strong enough to override the buy-confidence gate.
    pub fn is_strong(&self, index: f64) -> bool {
        index < self.strong_momentum_threshold
    }
}

/// Mean of inverted RSI, inverted %K and the MACD histogram score.
pub fn technical_score(snap: &IndicatorSnapshot) -> f64 {
    let inverted = |v: f64| if v.is_finite() { (100.0 - v).clamp(0.0, 100.0) } else { NEUTRAL };
    let rsi = inverted(snap.rsi);
    let stoch = inverted(snap.stoch_k);
    let macd = macd_score(snap.macd_hist);
    debug!(rsi, stoch, macd, "technical components");
    (rsi + stoch + macd) / 3.0
}

/// A negative histogram scores above 50, a positive one below.
fn macd_score(hist: f64) -> f64 {
    if !hist.is_finite() || hist == 0.0 {
        return NEUTRAL;
    }
    let clamped = (hist * 100.0).clamp(-100.0, 100.0);
    (NEUTRAL - clamped / 2.0).clamp(0.0, 100.0)
}

/// Tiered score of the latest volume over its average.
pub fn volume_score(ratio: f64) -> f64 {
    if !(ratio > 0.0) {
        return NEUTRAL;
    }
    match ratio {
        r if r > 1.5 => 75.0,
        r if r > 1.2 => 65.0,
        r if r > 0.8 => 50.0,
        r if r > 0.5 => 35.0,
        _ => 20.0,
    }
}

/// 50 plus five points per percent of outperformance, clamped to 0-100.
pub fn relative_strength_score(change_pct: f64, reference_change_pct: f64) -> f64 {
    if !change_pct.is_finite() || !reference_change_pct.is_finite() {
        return NEUTRAL;
    }
    (NEUTRAL + (change_pct - reference_change_pct) * 5.0).clamp(0.0, 100.0)
}
