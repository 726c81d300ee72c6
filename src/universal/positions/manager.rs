use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::stats::TradeStats;
use super::{CloseReason, ExitCheck, OpenRequest, Position, PositionError, PositionStatus, Side, TrailingStop};
use crate::common::config::{BotConfig, SymbolOverride, TrailingStopConfig};
use crate::common::exchange::AssetBalance;
use crate::universal::gates::LiquidationGuard;
use crate::universal::ledger::{self, TradeBook};
use crate::universal::models::IndicatorSnapshot;
use crate::universal::regime::{Regime, RegimeProfile};
use crate::universal::store::StateStore;

// Absorbs float noise on exact threshold hits (e.g. 100 -> 104 at a 4% target).
const EPS: f64 = 1e-9;

/// Risk parameters the manager reads once at startup.
#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub max_positions: usize,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub trailing: TrailingStopConfig,
    pub rsi_overbought: f64,
    pub rsi_reversal: f64,
    pub sync_tolerance_percent: f64,
    pub quote_asset: String,
    pub bull: RegimeProfile,
    pub bear: RegimeProfile,
    pub sideways: RegimeProfile,
    pub liquidation: LiquidationGuard,
    pub overrides: HashMap<String, SymbolOverride>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

impl RiskSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        Self {
            max_positions: cfg.risk.max_positions,
            stop_loss_percent: cfg.risk.stop_loss_percent,
            take_profit_percent: cfg.risk.take_profit_percent,
            trailing: cfg.risk.trailing_stop.clone(),
            rsi_overbought: cfg.risk.rsi_overbought,
            rsi_reversal: cfg.risk.rsi_reversal,
            sync_tolerance_percent: cfg.risk.sync_tolerance_percent,
            quote_asset: cfg.trading.quote_asset.clone(),
            bull: cfg.regime.bull.clone(),
            bear: cfg.regime.bear.clone(),
            sideways: cfg.regime.sideways.clone(),
            liquidation: LiquidationGuard::from_config(&cfg.futures),
            overrides: cfg.overrides.clone(),
        }
    }

    pub fn profile(&self, regime: Regime) -> &RegimeProfile {
        match regime {
            Regime::Bull => &self.bull,
            Regime::Bear => &self.bear,
            Regime::Sideways => &self.sideways,
        }
    }

    /// Base (stop_loss, take_profit) percents for `symbol` before regime scaling.
    pub fn base_percents(&self, symbol: &str) -> (f64, f64) {
        let o = self.overrides.get(symbol);
        (
            o.and_then(|o| o.stop_loss_percent).unwrap_or(self.stop_loss_percent),
            o.and_then(|o| o.take_profit_percent).unwrap_or(self.take_profit_percent),
        )
    }
}

/// Regime-adjusted levels computed for a prospective entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub stop_loss_price: f64,
    pub liquidation_price: Option<f64>,
}

/// Sole owner of position state.
///
/// Every transition goes through this type and is written through to the
/// [`StateStore`] afterwards. Store failures are logged and the in-memory
/// state stays authoritative for the rest of the run.
pub struct PositionManager {
    settings: RiskSettings,
    book: Mutex<TradeBook<Position>>,
    store: Arc<dyn StateStore>,
}

impl PositionManager {
    pub fn new(settings: RiskSettings, store: Arc<dyn StateStore>) -> Self {
        Self {
            settings,
            book: Mutex::new(TradeBook::new()),
            store,
        }
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    fn lock(&self, op: &str) -> Result<MutexGuard<'_, TradeBook<Position>>, PositionError> {
        self.book
            .lock()
            .map_err(|e| PositionError::Internal(format!("Mutex poisoned in {}: {}", op, e)))
    }

    /// Reloads open positions and closed history from the store.
    ///
    /// Returns the number of open positions restored.
    pub fn restore(&self) -> anyhow::Result<usize> {
        let open = self.store.get_open_positions()?;
        let history = self.store.get_closed_positions()?;
        let mut book = self
            .book
            .lock()
            .map_err(|e| anyhow::anyhow!("Mutex poisoned in restore: {}", e))?;
        *book = TradeBook::new();
        book.restore_history(history);
        for (_, pos) in open {
            if !pos.is_open() {
                continue;
            }
            if let Err(err) = book.record_open(pos) {
                warn!("skipping duplicate persisted position: {}", err);
            }
        }
        let restored = book.open_count();
        info!(restored, "restored open positions from store");
        Ok(restored)
    }

    /// Returns `Ok(())` when a new position may be opened for `symbol`.
    pub fn check_can_open(&self, symbol: &str) -> Result<(), PositionError> {
        let book = self.lock("check_can_open")?;
        self.check_can_open_locked(&book, symbol)
    }

    fn check_can_open_locked(&self, book: &TradeBook<Position>, symbol: &str) -> Result<(), PositionError> {
        book.can_open(symbol)?;
        let open = book.open_count();
        if open >= self.settings.max_positions {
            return Err(PositionError::MaxPositions {
                open,
                max: self.settings.max_positions,
            });
        }
        Ok(())
    }

    /// False if `symbol` already has an open position or the portfolio cap
    /// is reached. A poisoned lock answers false.
    pub fn can_open(&self, symbol: &str) -> bool {
        self.check_can_open(symbol).is_ok()
    }

    fn plan(&self, req: &OpenRequest) -> Result<PlannedEntry, PositionError> {
        if !(req.entry_price > 0.0) {
            return Err(PositionError::InvalidRequest(format!("entry_price must be positive, got {}", req.entry_price)));
        }
        if !(req.quantity > 0.0) {
            return Err(PositionError::InvalidRequest(format!("quantity must be positive, got {}", req.quantity)));
        }
        if req.leverage == 0 {
            return Err(PositionError::InvalidRequest("leverage must be at least 1".into()));
        }
        if req.side == Side::SpotBuy && req.leverage > 1 {
            return Err(PositionError::InvalidRequest("spot positions cannot be leveraged".into()));
        }

        let (base_sl, base_tp) = self.settings.base_percents(&req.symbol);
        let profile = self.settings.profile(req.regime);
        let stop_loss_percent = base_sl * profile.stop_loss_multiplier;
        let take_profit_percent = base_tp * profile.take_profit_multiplier;
        let stop_loss_price = req.entry_price * (1.0 - req.side.direction() * stop_loss_percent / 100.0);

        let liquidation_price = if req.leverage > 1 {
            match self
                .settings
                .liquidation
                .assess(req.entry_price, stop_loss_price, req.leverage, req.side)
            {
                Ok(liq) => Some(liq),
                Err((liq, required)) => {
                    return Err(PositionError::LiquidationBuffer {
                        symbol: req.symbol.clone(),
                        stop_loss_price,
                        liquidation_price: liq,
                        required_stop_price: required,
                    })
                }
            }
        } else {
            None
        };

        Ok(PlannedEntry {
            stop_loss_percent,
            take_profit_percent,
            stop_loss_price,
            liquidation_price,
        })
    }

    /// Runs every open-time check without committing anything.
    ///
    /// The engine calls this before sending an order so that a rejected
    /// entry never reaches the exchange.
    pub fn prepare(&self, req: &OpenRequest) -> Result<PlannedEntry, PositionError> {
        self.check_can_open(&req.symbol)?;
        self.plan(req)
    }

    /// Opens a position with regime-adjusted stops.
    ///
    /// Leveraged entries are rejected when the stop-loss would sit inside
    /// the liquidation buffer.
    pub fn open(&self, req: OpenRequest) -> Result<Position, PositionError> {
        let mut book = self.lock("open")?;
        self.check_can_open_locked(&book, &req.symbol)?;
        let plan = self.plan(&req)?;

        let trailing = &self.settings.trailing;
        let position = Position {
            trailing_stop: TrailingStop::new(
                req.side,
                req.entry_price,
                plan.stop_loss_percent,
                trailing.enabled,
                trailing.activation_profit_percent,
                trailing.trail_percent,
            ),
            symbol: req.symbol,
            side: req.side,
            entry_price: req.entry_price,
            quantity: req.quantity,
            entry_time: Utc::now(),
            leverage: req.leverage,
            stop_loss_percent: plan.stop_loss_percent,
            take_profit_percent: plan.take_profit_percent,
            liquidation_price: plan.liquidation_price,
            regime: req.regime,
            signals: req.signals,
            status: PositionStatus::Open,
            close_reason: None,
            exit_price: None,
            exit_time: None,
            realized_pnl_percent: None,
            realized_pnl_usd: None,
        };
        book.record_open(position.clone())?;
        drop(book);

        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = position.entry_price,
            qty = position.quantity,
            leverage = position.leverage,
            sl = position.stop_loss_percent,
            tp = position.take_profit_percent,
            regime = %position.regime,
            "position opened"
        );
        if let Err(err) = self.store.save_position(&position) {
            warn!(symbol = %position.symbol, "failed to persist opened position: {err:#}");
        }
        Ok(position)
    }

    /// Ratchets the trailing stop for `symbol` at `current_price`.
    ///
    /// Returns the new `current_stop_percent` when it moved, `None` otherwise.
    pub fn update_trailing_stop(&self, symbol: &str, current_price: f64) -> Option<f64> {
        let mut book = self.lock("update_trailing_stop").ok()?;
        let pos = book.get_open_mut(symbol)?;
        if !pos.trailing_stop.enabled || !pos.is_open() {
            return None;
        }
        let profit = pos.profit_percent(current_price);
        if profit < pos.trailing_stop.activation_profit_percent {
            return None;
        }

        let change = pos.price_change_percent(current_price);
        let ts = &mut pos.trailing_stop;
        let updated = if pos.side.is_short() {
            let lowest = ts.lowest_price.unwrap_or(pos.entry_price);
            if current_price >= lowest {
                return None;
            }
            ts.lowest_price = Some(current_price);
            let candidate = change + ts.trail_percent;
            (candidate < ts.current_stop_percent).then(|| {
                ts.current_stop_percent = candidate;
                candidate
            })
        } else {
            let highest = ts.highest_price.unwrap_or(pos.entry_price);
            if current_price <= highest {
                return None;
            }
            ts.highest_price = Some(current_price);
            let candidate = change - ts.trail_percent;
            (candidate > ts.current_stop_percent).then(|| {
                ts.current_stop_percent = candidate;
                candidate
            })
        };

        let snapshot = pos.clone();
        drop(book);
        if let Some(stop) = updated {
            debug!(symbol, price = current_price, stop, "trailing stop ratcheted");
        }
        if let Err(err) = self.store.save_position(&snapshot) {
            warn!(symbol, "failed to persist trailing stop: {err:#}");
        }
        updated
    }

    /// True when price has crossed the trailing stop level.
    pub fn check_trailing_stop(&self, symbol: &str, current_price: f64) -> bool {
        let Some(pos) = self.get_position(symbol) else {
            return false;
        };
        let ts = &pos.trailing_stop;
        if !ts.enabled {
            return false;
        }
        let change = pos.price_change_percent(current_price);
        if pos.side.is_short() {
            change + EPS >= ts.current_stop_percent
        } else {
            change <= ts.current_stop_percent + EPS
        }
    }

    /// True when the loss from `entry_price` reaches the stop-loss percent.
    ///
    /// The position's own stop-loss wins over the configured default; without
    /// a position the move is judged as a long.
    pub fn check_fixed_stop_loss(&self, current_price: f64, entry_price: f64, position: Option<&Position>) -> bool {
        let (side, stop) = match position {
            Some(p) => (p.side, p.stop_loss_percent),
            None => (Side::Long, self.settings.stop_loss_percent),
        };
        let loss = -ledger::directional_profit_percent(side.direction(), entry_price, current_price);
        loss + EPS >= stop
    }

    /// Signal-based exit check: take-profit, RSI reversal, MACD cross, in
    /// that order. `previous` is the prior tick's snapshot for cross detection.
    pub fn check_exit_signal(
        &self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
    ) -> ExitCheck {
        let Some(pos) = self.get_position(symbol) else {
            return ExitCheck::hold(0.0);
        };
        let profit = pos.profit_percent(snapshot.price);

        if profit + EPS >= pos.take_profit_percent {
            return ExitCheck::exit(CloseReason::TakeProfit, profit);
        }

        let rsi = snapshot.rsi;
        if rsi.is_finite() {
            if !pos.side.is_short() && rsi > self.settings.rsi_overbought {
                return ExitCheck::exit(CloseReason::RsiOverbought, profit);
            }
            if pos.side.is_short() && rsi < self.settings.rsi_reversal {
                return ExitCheck::exit(CloseReason::RsiReversal, profit);
            }
        }

        if let Some(prev) = previous {
            let now = (snapshot.macd, snapshot.macd_signal);
            let before = (prev.macd, prev.macd_signal);
            let all_finite = [now.0, now.1, before.0, before.1].iter().all(|v| v.is_finite());
            if all_finite {
                if !pos.side.is_short() && before.0 > before.1 && now.0 < now.1 {
                    return ExitCheck::exit(CloseReason::MacdBearishCross, profit);
                }
                if pos.side.is_short() && before.0 < before.1 && now.0 > now.1 {
                    return ExitCheck::exit(CloseReason::MacdBullishCross, profit);
                }
            }
        }

        ExitCheck::hold(profit)
    }

    /// Closes the open position for `symbol`.
    ///
    /// P/L is leverage-scaled and the USD figure is taken on margin at risk.
    /// Without an open position this is a logged no-op returning `None`.
    pub fn close(&self, symbol: &str, exit_price: f64, reason: CloseReason) -> Option<Position> {
        let mut book = match self.lock("close") {
            Ok(book) => book,
            Err(err) => {
                warn!(symbol, "{err}");
                return None;
            }
        };
        let closed = book.record_close(symbol, |pos| {
            let pct = pos.profit_percent(exit_price) * f64::from(pos.leverage.max(1));
            pos.status = PositionStatus::Closed;
            pos.close_reason = Some(reason);
            pos.exit_price = Some(exit_price);
            pos.exit_time = Some(Utc::now());
            pos.realized_pnl_percent = Some(pct);
            pos.realized_pnl_usd = Some(ledger::pnl_usd(pos.entry_price, pos.quantity, pos.leverage, pct));
        });
        drop(book);

        let pos = match closed {
            Ok(pos) => pos,
            Err(err) => {
                warn!(symbol, %reason, "close ignored: {}", PositionError::from(err));
                return None;
            }
        };

        info!(
            symbol,
            %reason,
            exit = exit_price,
            pnl_pct = pos.realized_pnl_percent.unwrap_or_default(),
            pnl_usd = pos.realized_pnl_usd.unwrap_or_default(),
            "position closed"
        );
        if let Err(err) = self.store.delete_position(symbol) {
            warn!(symbol, "failed to delete persisted position: {err:#}");
        }
        if let Err(err) = self.store.append_closed_position(&pos) {
            warn!(symbol, "failed to persist closed position: {err:#}");
        }
        Some(pos)
    }

    /// Force-closes spot positions whose base asset is no longer held.
    ///
    /// Futures positions (long or short) are margin positions and never show
    /// up as a base asset balance, so they are not reconciled here.
    ///
    /// A position is a ghost when the exchange balance of its base asset is
    /// below `quantity * (1 - tolerance)` or missing. Ghosts are closed at
    /// the last known price (entry price if none) with
    /// [`CloseReason::ManualSellDetected`].
    pub fn sync_with_exchange(
        &self,
        balances: &HashMap<String, AssetBalance>,
        last_prices: &HashMap<String, f64>,
    ) -> Vec<Position> {
        let tolerance = self.settings.sync_tolerance_percent / 100.0;
        let ghosts: Vec<(String, f64)> = self
            .open_positions()
            .into_iter()
            .filter(|p| p.side == Side::SpotBuy)
            .filter(|p| {
                let asset = p.base_asset(&self.settings.quote_asset);
                let held = balances.get(&asset).map(|b| b.total()).unwrap_or(0.0);
                held < p.quantity * (1.0 - tolerance)
            })
            .map(|p| {
                let price = last_prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                (p.symbol, price)
            })
            .collect();

        ghosts
            .into_iter()
            .filter_map(|(symbol, price)| {
                warn!(symbol = %symbol, price, "position missing on exchange, closing locally");
                self.close(&symbol, price, CloseReason::ManualSellDetected)
            })
            .collect()
    }

    pub fn get_position(&self, symbol: &str) -> Option<Position> {
        self.book.lock().ok()?.get_open(symbol).cloned()
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.book.lock().map(|b| b.has_open(symbol)).unwrap_or(false)
    }

    /// Open positions sorted by symbol.
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.lock().map(|b| b.list_open()).unwrap_or_default()
    }

    pub fn open_count(&self) -> usize {
        self.book.lock().map(|b| b.open_count()).unwrap_or(0)
    }

    pub fn closed_positions(&self) -> Vec<Position> {
        self.book.lock().map(|b| b.history().to_vec()).unwrap_or_default()
    }

    pub fn stats(&self) -> TradeStats {
        TradeStats::from_closed(&self.closed_positions())
    }
}
