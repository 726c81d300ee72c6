//! Standard technical indicators over a candle series.
//!
//! Textbook formulas (Wilder RSI/ADX/ATR, EMA seeded with the first value,
//! 20/2 Bollinger bands, 14/3 stochastic, 12/26/9 MACD). Series shorter than
//! an indicator's window yield `NaN` for that indicator.

use chrono::Utc;

use super::models::{Candle, IndicatorSnapshot};

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() || period == 0 {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[0];
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            prev = v * k + prev * (1.0 - k);
        }
        out.push(prev);
    }
    out
}

pub fn sma(values: &[f64], period: usize) -> f64 {
    if period == 0 || values.len() < period {
        return f64::NAN;
    }
    values[values.len() - period..].iter().sum::<f64>() / period as f64
}

fn std_dev(values: &[f64], period: usize) -> f64 {
    let mean = sma(values, period);
    if mean.is_nan() {
        return f64::NAN;
    }
    let tail = &values[values.len() - period..];
    (tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64).sqrt()
}

pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if closes.len() <= period {
        return f64::NAN;
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    for w in closes[..=period].windows(2) {
        let d = w[1] - w[0];
        if d > 0.0 {
            gain += d;
        } else {
            loss -= d;
        }
    }
    let p = period as f64;
    let (mut avg_gain, mut avg_loss) = (gain / p, loss / p);
    for w in closes[period..].windows(2) {
        let d = w[1] - w[0];
        avg_gain = (avg_gain * (p - 1.0) + d.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-d).max(0.0)) / p;
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// (%K, %D) stochastic oscillator.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> (f64, f64) {
    if candles.len() < k_period + d_period - 1 {
        return (f64::NAN, f64::NAN);
    }
    let k_at = |end: usize| {
        let window = &candles[end + 1 - k_period..=end];
        let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if high > low {
            (candles[end].close - low) / (high - low) * 100.0
        } else {
            50.0
        }
    };
    let last = candles.len() - 1;
    let ks: Vec<f64> = (0..d_period).map(|i| k_at(last - i)).collect();
    (ks[0], ks.iter().sum::<f64>() / d_period as f64)
}

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect()
}

fn wilder(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period || period == 0 {
        return Vec::new();
    }
    let p = period as f64;
    let mut out = vec![values[..period].iter().sum::<f64>() / p];
    for v in &values[period..] {
        let prev = out[out.len() - 1];
        out.push((prev * (p - 1.0) + v) / p);
    }
    out
}

/// ATR series (Wilder smoothing).
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    wilder(&true_ranges(candles), period)
}

pub fn adx(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period * 2 + 1 {
        return f64::NAN;
    }
    let mut plus_dm = Vec::with_capacity(candles.len());
    let mut minus_dm = Vec::with_capacity(candles.len());
    for w in candles.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }
    let tr = wilder(&true_ranges(candles), period);
    let pdm = wilder(&plus_dm, period);
    let mdm = wilder(&minus_dm, period);
    let dx: Vec<f64> = tr
        .iter()
        .zip(pdm.iter().zip(mdm.iter()))
        .map(|(t, (p, m))| {
            if *t == 0.0 {
                return 0.0;
            }
            let pdi = p / t * 100.0;
            let mdi = m / t * 100.0;
            if pdi + mdi == 0.0 {
                0.0
            } else {
                (pdi - mdi).abs() / (pdi + mdi) * 100.0
            }
        })
        .collect();
    wilder(&dx, period).last().copied().unwrap_or(f64::NAN)
}

/// Builds the full snapshot for the latest candle.
pub fn compute_snapshot(symbol: &str, candles: &[Candle]) -> Option<IndicatorSnapshot> {
    let last = candles.last()?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
    let n = closes.len();

    let mut snap = IndicatorSnapshot::price_only(symbol, last.close);
    snap.timestamp = Utc::now();
    snap.volume = last.volume;
    snap.rsi = rsi(&closes, 14);

    let (k, d) = stochastic(candles, 14, 3);
    snap.stoch_k = k;
    snap.stoch_d = d;

    if n >= 35 {
        let fast = ema(&closes, 12);
        let slow = ema(&closes, 26);
        let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ema(&macd_line, 9);
        snap.macd = macd_line[n - 1];
        snap.macd_signal = signal[n - 1];
        snap.macd_hist = snap.macd - snap.macd_signal;
    }

    let mid = sma(&closes, 20);
    let sd = std_dev(&closes, 20);
    snap.sma_20 = mid;
    snap.bb_middle = mid;
    snap.bb_upper = mid + 2.0 * sd;
    snap.bb_lower = mid - 2.0 * sd;

    snap.adx = adx(candles, 14);
    let ema_last = |period: usize| {
        if n >= period {
            ema(&closes, period)[n - 1]
        } else {
            f64::NAN
        }
    };
    snap.ema_9 = ema_last(9);
    snap.ema_21 = ema_last(21);
    snap.ema_50 = ema_last(50);
    snap.ema_200 = ema_last(200);

    let avg_vol = sma(&volumes, 20);
    snap.volume_ratio = if avg_vol > 0.0 { last.volume / avg_vol } else { f64::NAN };
    if n >= 2 && closes[n - 2] != 0.0 {
        snap.price_change_pct = (closes[n - 1] - closes[n - 2]) / closes[n - 2] * 100.0;
    }
    if n > 10 && closes[n - 11] != 0.0 {
        snap.rate_of_change = (closes[n - 1] - closes[n - 11]) / closes[n - 11] * 100.0;
    }
    if n > 20 {
        let window = &candles[n - 21..n - 1];
        snap.high_20 = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        snap.low_20 = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    }

    let atrs = atr_series(candles, 14);
    if let Some(a) = atrs.last() {
        snap.atr = *a;
        snap.atr_avg = sma(&atrs, atrs.len().min(20));
    }
    Some(snap)
}
