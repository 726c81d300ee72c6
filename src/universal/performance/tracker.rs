use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::signals::{IndicatorKind, IndicatorSignals};
use crate::common::config::PerformanceConfig;

const NEUTRAL_RATE: f64 = 0.5;
const MIN_RESOLVED: usize = 5;
const RECENT_WINDOW: usize = 10;
const RECENT_BLEND: f64 = 0.3;
const MIN_WEIGHT: f64 = 0.10;
const MAX_WEIGHT: f64 = 0.40;
const MATCH_WINDOW_SECS: i64 = 60;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    /// Whether the indicator was bullish at that tick.
    pub fired: bool,
    pub price: f64,
    /// Price change percent over the outcome horizon once known.
    pub outcome: Option<f64>,
}

impl SignalRecord {
    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }
}

/// A tracked signal waiting for its outcome horizon to pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingResolution {
    pub symbol: String,
    pub timeframe: String,
    pub indicator: IndicatorKind,
    pub timestamp: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSeries {
    pub symbol: String,
    pub timeframe: String,
    pub indicator: IndicatorKind,
    pub records: Vec<SignalRecord>,
}

/// Serializable form of the whole ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub series: Vec<SignalSeries>,
    pub pending: Vec<PendingResolution>,
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStats {
    pub total_signals: usize,
    pub resolved_signals: usize,
    pub success_rate: f64,
    pub avg_outcome: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicatorStatistics {
    pub symbol: String,
    pub timeframe: String,
    pub indicators: BTreeMap<IndicatorKind, IndicatorStats>,
}

type SeriesKey = (String, String, IndicatorKind);

/// Rolling signal/outcome history per symbol, timeframe and indicator.
///
/// Weights are never stored; they are recomputed from the history on every
/// call, so restoring the history restores the weights.
pub struct PerformanceLedger {
    max_signals: usize,
    min_profit_threshold: f64,
    outcome_horizon: Duration,
    series: DashMap<SeriesKey, VecDeque<SignalRecord>>,
    pending: Mutex<Vec<PendingResolution>>,
}

impl PerformanceLedger {
    pub fn new(cfg: &PerformanceConfig) -> Self {
        Self {
            max_signals: cfg.max_signals_per_indicator.max(1),
            min_profit_threshold: cfg.min_profit_threshold,
            outcome_horizon: Duration::seconds(cfg.outcome_horizon_secs.max(0)),
            series: DashMap::new(),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn key(symbol: &str, indicator: IndicatorKind, timeframe: &str) -> SeriesKey {
        (symbol.to_string(), timeframe.to_string(), indicator)
    }

    /// Unresolved records older than this lost their pending entry and are dropped.
    fn stale_after(&self) -> Duration {
        self.outcome_horizon * 2 + Duration::seconds(MATCH_WINDOW_SECS)
    }

    /// Appends one signal.
    ///
    /// The history cap counts resolved records only: a record still waiting
    /// for its outcome is never evicted before its horizon has passed.
    pub fn track_signal(
        &self,
        symbol: &str,
        indicator: IndicatorKind,
        timeframe: &str,
        fired: bool,
        price: f64,
        at: DateTime<Utc>,
    ) {
        let mut series = self.series.entry(Self::key(symbol, indicator, timeframe)).or_default();
        series.push_back(SignalRecord {
            timestamp: at,
            fired,
            price,
            outcome: None,
        });
        evict(&mut series, self.max_signals, at - self.stale_after());
        debug!(symbol, %indicator, fired, "tracked indicator signal");
    }

    /// Tracks all four indicators for one tick and schedules their outcomes.
    pub fn track_snapshot(&self, symbol: &str, timeframe: &str, signals: &IndicatorSignals, price: f64, at: DateTime<Utc>) {
        let due_at = at + self.outcome_horizon;
        let mut scheduled = Vec::with_capacity(IndicatorKind::ALL.len());
        for kind in IndicatorKind::ALL {
            self.track_signal(symbol, kind, timeframe, signals.get(kind), price, at);
            scheduled.push(PendingResolution {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                indicator: kind,
                timestamp: at,
                due_at,
            });
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.extend(scheduled);
        }
    }

    /// Records the outcome of the unresolved signal tracked closest to
    /// `timestamp`, within a minute of it.
    ///
    /// Returns false when no such signal exists.
    pub fn resolve_outcome(
        &self,
        symbol: &str,
        indicator: IndicatorKind,
        timeframe: &str,
        timestamp: DateTime<Utc>,
        price_after: f64,
    ) -> bool {
        let Some(mut series) = self.series.get_mut(&Self::key(symbol, indicator, timeframe)) else {
            return false;
        };
        let distance = |r: &SignalRecord| (r.timestamp - timestamp).num_milliseconds().abs();
        let Some(record) = series
            .iter_mut()
            .filter(|r| r.outcome.is_none() && distance(&**r) < MATCH_WINDOW_SECS * 1_000)
            .min_by_key(|r| distance(&**r))
        else {
            return false;
        };
        if record.price <= 0.0 {
            return false;
        }
        let change = (price_after - record.price) / record.price * 100.0;
        record.outcome = Some(change);
        debug!(symbol, %indicator, change, "resolved indicator outcome");
        let stale_before = timestamp - self.stale_after();
        evict(&mut series, self.max_signals, stale_before);
        true
    }

    /// Resolves every pending signal of `symbol` whose horizon has passed,
    /// using `price` as the post-horizon price. Returns how many resolved.
    pub fn resolve_due(&self, symbol: &str, price: f64, now: DateTime<Utc>) -> usize {
        let due: Vec<PendingResolution> = match self.pending.lock() {
            Ok(mut pending) => {
                let (due, keep): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|p| p.symbol == symbol && p.due_at <= now);
                *pending = keep;
                due
            }
            Err(_) => return 0,
        };
        due.iter()
            .filter(|p| self.resolve_outcome(&p.symbol, p.indicator, &p.timeframe, p.timestamp, price))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Success rate of fired, resolved signals, 0.5 with fewer than five.
    ///
    /// Blends the last ten (30%) with the full window (70%).
    pub fn success_rate(&self, symbol: &str, indicator: IndicatorKind, timeframe: &str) -> f64 {
        let Some(series) = self.series.get(&Self::key(symbol, indicator, timeframe)) else {
            return NEUTRAL_RATE;
        };
        let outcomes: Vec<f64> = series
            .iter()
            .filter(|r| r.fired)
            .filter_map(|r| r.outcome)
            .collect();
        if outcomes.len() < MIN_RESOLVED {
            return NEUTRAL_RATE;
        }
        let hit = |o: &&f64| **o >= self.min_profit_threshold;
        let overall = outcomes.iter().filter(hit).count() as f64 / outcomes.len() as f64;
        let recent = &outcomes[outcomes.len().saturating_sub(RECENT_WINDOW)..];
        let recent_rate = recent.iter().filter(hit).count() as f64 / recent.len() as f64;
        RECENT_BLEND * recent_rate + (1.0 - RECENT_BLEND) * overall
    }

    /// Weights of the four indicators, each clamped to [0.10, 0.40] and then
    /// renormalised to sum to 1. Equal weights until there is history.
    pub fn indicator_weights(&self, symbol: &str, timeframe: &str) -> BTreeMap<IndicatorKind, f64> {
        let rates: BTreeMap<IndicatorKind, f64> = IndicatorKind::ALL
            .iter()
            .map(|k| (*k, self.success_rate(symbol, *k, timeframe)))
            .collect();
        let total: f64 = rates.values().sum();
        let equal = 1.0 / IndicatorKind::ALL.len() as f64;
        if total == 0.0 || rates.values().all(|r| *r == NEUTRAL_RATE) {
            return IndicatorKind::ALL.iter().map(|k| (*k, equal)).collect();
        }

        let clamped: BTreeMap<IndicatorKind, f64> = rates
            .iter()
            .map(|(k, r)| (*k, (r / total).clamp(MIN_WEIGHT, MAX_WEIGHT)))
            .collect();
        let sum: f64 = clamped.values().sum();
        let weights: BTreeMap<IndicatorKind, f64> = clamped.into_iter().map(|(k, w)| (k, w / sum)).collect();
        info!(symbol, timeframe, ?weights, "dynamic indicator weights");
        weights
    }

    /// Sum of the weights of the indicators that are bullish, 0..=1.
    pub fn buy_confidence(&self, symbol: &str, signals: &IndicatorSignals, timeframe: &str) -> f64 {
        let weights = self.indicator_weights(symbol, timeframe);
        IndicatorKind::ALL
            .iter()
            .filter(|k| signals.get(**k))
            .map(|k| weights.get(k).copied().unwrap_or(0.0))
            .sum()
    }

    pub fn statistics(&self, symbol: &str, timeframe: &str) -> IndicatorStatistics {
        let mut indicators = BTreeMap::new();
        for kind in IndicatorKind::ALL {
            let (total, resolved) = self
                .series
                .get(&Self::key(symbol, kind, timeframe))
                .map(|s| {
                    let resolved: Vec<f64> = s.iter().filter_map(|r| r.outcome).collect();
                    (s.len(), resolved)
                })
                .unwrap_or_default();
            let (success_rate, avg_outcome) = if resolved.is_empty() {
                (NEUTRAL_RATE, 0.0)
            } else {
                (
                    self.success_rate(symbol, kind, timeframe),
                    resolved.iter().sum::<f64>() / resolved.len() as f64,
                )
            };
            indicators.insert(
                kind,
                IndicatorStats {
                    total_signals: total,
                    resolved_signals: resolved.len(),
                    success_rate,
                    avg_outcome,
                },
            );
        }
        IndicatorStatistics {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            indicators,
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let mut series: Vec<SignalSeries> = self
            .series
            .iter()
            .map(|e| {
                let (symbol, timeframe, indicator) = e.key().clone();
                SignalSeries {
                    symbol,
                    timeframe,
                    indicator,
                    records: e.value().iter().cloned().collect(),
                }
            })
            .collect();
        series.sort_by(|a, b| (&a.symbol, &a.timeframe, a.indicator).cmp(&(&b.symbol, &b.timeframe, b.indicator)));
        PerformanceSnapshot {
            series,
            pending: self.pending.lock().map(|p| p.clone()).unwrap_or_default(),
            saved_at: Some(Utc::now()),
        }
    }

    /// Replaces the in-memory history with `snapshot`.
    pub fn restore(&self, snapshot: PerformanceSnapshot) {
        self.series.clear();
        for s in snapshot.series {
            let mut records: VecDeque<SignalRecord> = s.records.into_iter().collect();
            if let Some(newest) = records.iter().map(|r| r.timestamp).max() {
                evict(&mut records, self.max_signals, newest - self.stale_after());
            }
            self.series.insert((s.symbol, s.timeframe, s.indicator), records);
        }
        if let Ok(mut pending) = self.pending.lock() {
            *pending = snapshot.pending;
        }
        info!(series = self.series.len(), pending = self.pending_count(), "restored indicator history");
    }
}

/// Drops unresolved records tracked before `stale_before`, then the oldest
/// resolved records beyond `max_resolved`.
fn evict(records: &mut VecDeque<SignalRecord>, max_resolved: usize, stale_before: DateTime<Utc>) {
    records.retain(|r| r.is_resolved() || r.timestamp >= stale_before);
    let mut excess = records
        .iter()
        .filter(|r| r.is_resolved())
        .count()
        .saturating_sub(max_resolved);
    records.retain(|r| {
        if excess > 0 && r.is_resolved() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}
