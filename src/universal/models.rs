
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle as returned by the exchange kline endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Immutable technical reading for one symbol at one tick.
///
/// Fields that could not be computed (too little history) are `NaN`;
/// consumers treat those as "no signal".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub rsi: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub adx: f64,
    pub ema_9: f64,
    pub ema_21: f64,
    pub ema_50: f64,
    pub ema_200: f64,
    pub sma_20: f64,
    pub volume: f64,
    /// Latest volume over its 20-candle average.
    pub volume_ratio: f64,
    /// Change of the last candle close versus the previous close, percent.
    pub price_change_pct: f64,
    /// Ten-candle rate of change, percent.
    pub rate_of_change: f64,
    /// Highest high / lowest low of the 20 candles before the latest one.
    pub high_20: f64,
    pub low_20: f64,
    pub atr: f64,
    pub atr_avg: f64,
}

impl IndicatorSnapshot {
    /// A snapshot with only a price; every indicator is `NaN`.
    pub fn price_only(symbol: &str, price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            price,
            rsi: f64::NAN,
            stoch_k: f64::NAN,
            stoch_d: f64::NAN,
            macd: f64::NAN,
            macd_signal: f64::NAN,
            macd_hist: f64::NAN,
            bb_upper: f64::NAN,
            bb_middle: f64::NAN,
            bb_lower: f64::NAN,
            adx: f64::NAN,
            ema_9: f64::NAN,
            ema_21: f64::NAN,
            ema_50: f64::NAN,
            ema_200: f64::NAN,
            sma_20: f64::NAN,
            volume: f64::NAN,
            volume_ratio: f64::NAN,
            price_change_pct: f64::NAN,
            rate_of_change: f64::NAN,
            high_20: f64::NAN,
            low_20: f64::NAN,
            atr: f64::NAN,
            atr_avg: f64::NAN,
        }
    }

    /// True when the oscillators the strategies depend on are all present.
    pub fn is_complete(&self) -> bool {
        [self.price, self.rsi, self.stoch_k, self.macd_hist, self.bb_lower, self.adx]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Relative Bollinger band width.
    pub fn bb_width(&self) -> f64 {
        if self.bb_middle.is_finite() && self.bb_middle != 0.0 {
            (self.bb_upper - self.bb_lower) / self.bb_middle
        } else {
            f64::NAN
        }
    }

    /// Position of price inside the Bollinger band, 0 = lower, 1 = upper.
    pub fn bb_position(&self) -> f64 {
        let range = self.bb_upper - self.bb_lower;
        if range.is_finite() && range > 0.0 {
            (self.price - self.bb_lower) / range
        } else {
            0.5
        }
    }

    /// +1 when fast/medium/slow EMAs are stacked bullish, -1 bearish, 0 mixed.
    pub fn ema_alignment(&self) -> f64 {
        if self.ema_9 > self.ema_21 && self.ema_21 > self.ema_50 {
            1.0
        } else if self.ema_9 < self.ema_21 && self.ema_21 < self.ema_50 {
            -1.0
        } else {
            0.0
        }
    }
}

/// Value or a neutral default when the reading is missing.
#[inline]
pub fn or_default(value: f64, default: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        default
    }
}
