use std::fmt;

use serde::{Deserialize, Serialize};

use super::models::IndicatorSnapshot;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull,
    Bear,
    #[default]
    Sideways,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Regime::Bull => "bull",
            Regime::Bear => "bear",
            Regime::Sideways => "sideways",
        };
        f.write_str(s)
    }
}

/// How a regime reshapes risk on entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegimeProfile {
    pub stop_loss_multiplier: f64,
    pub take_profit_multiplier: f64,
    pub allow_new_trades: bool,
}

impl RegimeProfile {
    pub fn neutral() -> Self {
        Self {
            stop_loss_multiplier: 1.0,
            take_profit_multiplier: 1.0,
            allow_new_trades: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RegimeReading {
    pub regime: Regime,
    pub rationale: String,
}

impl RegimeReading {
    fn sideways(rationale: impl Into<String>) -> Self {
        Self {
            regime: Regime::Sideways,
            rationale: rationale.into(),
        }
    }
}

/// Maps an indicator snapshot plus recent closes to bull/bear/sideways.
///
/// Bull: price above EMA50 and EMA200 with EMA50 above EMA200 and positive
/// momentum over the trend window. Bear: the mirror image with non-positive
/// momentum. A weak ADX, mixed alignment or missing data is sideways.
#[derive(Clone, Debug)]
pub struct RegimeClassifier {
    pub enabled: bool,
    pub bull_adx_threshold: f64,
    pub sideways_adx_threshold: f64,
    pub trend_strength_periods: usize,
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self {
            enabled: true,
            bull_adx_threshold: 25.0,
            sideways_adx_threshold: 20.0,
            trend_strength_periods: 10,
        }
    }
}

impl RegimeClassifier {
    pub fn from_config(cfg: &crate::common::config::RegimeConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            bull_adx_threshold: cfg.bull_adx_threshold,
            sideways_adx_threshold: cfg.sideways_adx_threshold,
            trend_strength_periods: cfg.trend_strength_periods,
        }
    }

    pub fn classify(&self, snap: &IndicatorSnapshot, closes: &[f64]) -> RegimeReading {
        if !self.enabled {
            return RegimeReading::sideways("regime detection disabled");
        }
        let required = [snap.price, snap.adx, snap.ema_50, snap.ema_200];
        if required.iter().any(|v| !v.is_finite()) {
            return RegimeReading::sideways("insufficient data");
        }

        let mut notes = Vec::new();
        let above_50 = snap.price > snap.ema_50;
        let above_200 = snap.price > snap.ema_200;
        let golden = snap.ema_50 > snap.ema_200;
        let strong = snap.adx > self.bull_adx_threshold;
        let weak = snap.adx < self.sideways_adx_threshold;

        let mut momentum_up = false;
        let n = self.trend_strength_periods;
        if n >= 2 && closes.len() >= n {
            let window = &closes[closes.len() - n..];
            if window[0] > 0.0 {
                let change = (window[n - 1] - window[0]) / window[0] * 100.0;
                momentum_up = change > 0.0;
                notes.push(format!("momentum {n} candles {change:+.2}%"));
            }
        }

        let mut regime = None;
        if above_50 && above_200 && golden && momentum_up {
            let strength = if strong { "strong" } else { "moderate" };
            notes.push(format!("{strength} bull: price above EMAs, ADX={:.1}", snap.adx));
            regime = Some(Regime::Bull);
        } else if !above_50 && !above_200 && !golden && !momentum_up {
            let strength = if strong { "strong" } else { "moderate" };
            notes.push(format!("{strength} bear: price below EMAs, ADX={:.1}", snap.adx));
            regime = Some(Regime::Bear);
        }

        let regime = match regime {
            Some(r) if !weak => r,
            _ => {
                notes.push(format!("sideways: ADX={:.1}, range-bound", snap.adx));
                Regime::Sideways
            }
        };

        RegimeReading {
            regime,
            rationale: notes.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(price: f64, ema_50: f64, ema_200: f64, adx: f64) -> IndicatorSnapshot {
        let mut s = IndicatorSnapshot::price_only("BTCUSDT", price);
        s.ema_50 = ema_50;
        s.ema_200 = ema_200;
        s.adx = adx;
        s
    }

    #[test]
    fn rising_trend_is_bull() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let r = RegimeClassifier::default().classify(&snap(110.0, 105.0, 100.0, 30.0), &closes);
        assert_eq!(r.regime, Regime::Bull);
    }

    #[test]
    fn falling_trend_is_bear() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        let r = RegimeClassifier::default().classify(&snap(90.0, 95.0, 100.0, 30.0), &closes);
        assert_eq!(r.regime, Regime::Bear);
    }

    #[test]
    fn weak_adx_overrides_trend() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let r = RegimeClassifier::default().classify(&snap(110.0, 105.0, 100.0, 15.0), &closes);
        assert_eq!(r.regime, Regime::Sideways);
    }

    #[test]
    fn nan_adx_defaults_to_sideways() {
        let r = RegimeClassifier::default().classify(&snap(110.0, 105.0, 100.0, f64::NAN), &[]);
        assert_eq!(r.regime, Regime::Sideways);
        assert_eq!(r.rationale, "insufficient data");
    }
}
