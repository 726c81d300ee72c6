//! The polling loop: one pass over every configured symbol per tick.
//!
//! All runtime state lives in a [`TradingContext`] built once at startup and
//! handed to the engine; nothing here is global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::causal::{technical_signals, CausalFilter};
use super::gates::{
    run_gates, BuyConfidenceGate, ConfidenceGate, EntryContext, Gate, LiquidationGuard, MomentumGate, RegimeGate,
};
use super::indicators::compute_snapshot;
use super::models::IndicatorSnapshot;
use super::momentum::MomentumIndex;
use super::notify::Notifier;
use super::performance::{IndicatorKind, IndicatorSignals, PerformanceLedger};
use super::positions::sizing::{position_quantity, SizingOutcome};
use super::positions::{CloseReason, OpenRequest, Position, PositionManager, RiskSettings, Side};
use super::regime::{Regime, RegimeClassifier, RegimeReading};
use super::store::StateStore;
use super::swarm::{SwarmCoordinator, SwarmVote, Vote};
use super::telegram::{ControlView, Ctrl};
use crate::common::config::BotConfig;
use crate::common::exchange::{ExchangeClient, OrderSide, SymbolFilters};

/// Live, shareable view of the loop for status readers.
#[derive(Default)]
pub struct StatusBoard {
    paused: AtomicBool,
    iterations: AtomicU64,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    prices: Mutex<HashMap<String, f64>>,
    regimes: Mutex<HashMap<String, RegimeReading>>,
}

impl StatusBoard {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        self.last_tick.lock().ok().and_then(|t| *t)
    }

    fn mark_tick(&self, at: DateTime<Utc>) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut t) = self.last_tick.lock() {
            *t = Some(at);
        }
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.prices.lock().ok()?.get(symbol).copied()
    }

    pub fn last_prices(&self) -> HashMap<String, f64> {
        self.prices.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn record_price(&self, symbol: &str, price: f64) {
        if let Ok(mut p) = self.prices.lock() {
            p.insert(symbol.to_string(), price);
        }
    }

    pub fn regime(&self, symbol: &str) -> Option<RegimeReading> {
        self.regimes.lock().ok()?.get(symbol).cloned()
    }

    fn record_regime(&self, symbol: &str, reading: RegimeReading) {
        if let Ok(mut r) = self.regimes.lock() {
            r.insert(symbol.to_string(), reading);
        }
    }
}

/// Everything a tick needs, wired together once at startup.
pub struct TradingContext {
    pub config: Arc<BotConfig>,
    pub exchange: Arc<dyn ExchangeClient>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub positions: Arc<PositionManager>,
    pub swarm: Arc<Mutex<SwarmCoordinator>>,
    pub performance: Arc<PerformanceLedger>,
    pub regime: RegimeClassifier,
    pub momentum: MomentumIndex,
    /// `None` when the causal filter is disabled.
    pub causal: Option<CausalFilter>,
    pub status: Arc<StatusBoard>,
}

impl TradingContext {
    pub fn new(
        config: Arc<BotConfig>,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let positions = PositionManager::new(RiskSettings::from_config(&config), store.clone());
        Self {
            positions: Arc::new(positions),
            swarm: Arc::new(Mutex::new(SwarmCoordinator::new(&config.swarm))),
            performance: Arc::new(PerformanceLedger::new(&config.performance)),
            regime: RegimeClassifier::from_config(&config.regime),
            momentum: MomentumIndex::from_config(&config.momentum),
            causal: config.causal.enabled.then(|| CausalFilter::from_config(&config.causal)),
            status: Arc::new(StatusBoard::default()),
            config,
            exchange,
            store,
            notifier,
        }
    }

    /// Reloads positions, swarm agents and indicator history from the store.
    ///
    /// Only open positions are required; the rest is best effort.
    pub fn restore(&self) -> anyhow::Result<()> {
        self.positions.restore()?;
        match self.store.get_worker_snapshots() {
            Ok(snaps) if !snaps.is_empty() => {
                if let Ok(mut swarm) = self.swarm.lock() {
                    swarm.restore(snaps);
                }
            }
            Ok(_) => {}
            Err(err) => warn!("could not load swarm agents: {err:#}"),
        }
        match self.store.get_performance() {
            Ok(Some(snapshot)) => self.performance.restore(snapshot),
            Ok(None) => {}
            Err(err) => warn!("could not load indicator history: {err:#}"),
        }
        Ok(())
    }

    pub fn control_view(&self) -> ControlView {
        ControlView {
            positions: self.positions.clone(),
            swarm: self.swarm.clone(),
            status: self.status.clone(),
        }
    }
}

/// What one tick did for one symbol.
#[derive(Clone, Debug, PartialEq)]
pub enum SymbolOutcome {
    NoData,
    Held,
    Exited(CloseReason),
    Entered(Side),
    Skipped(String),
}

#[derive(Clone, Debug, Default)]
pub struct IterationReport {
    pub reconciled: Vec<Position>,
    pub symbols: Vec<(String, SymbolOutcome)>,
}

pub struct TradingEngine {
    ctx: TradingContext,
    control_rx: mpsc::UnboundedReceiver<Ctrl>,
    previous: HashMap<String, IndicatorSnapshot>,
    call_timeout: Duration,
}

impl TradingEngine {
    /// Returns the engine and the sender chat handlers queue commands on.
    pub fn new(ctx: TradingContext) -> (Self, mpsc::UnboundedSender<Ctrl>) {
        let (tx, control_rx) = mpsc::unbounded_channel();
        let cfg = &ctx.config.exchange;
        // Room for the client's own retries inside one bounded call.
        let per_try = cfg.request_timeout_secs.max(1);
        let call_timeout = Duration::from_secs(per_try * (cfg.retry_attempts as u64 + 1));
        let engine = Self {
            ctx,
            control_rx,
            previous: HashMap::new(),
            call_timeout,
        };
        (engine, tx)
    }

    pub fn context(&self) -> &TradingContext {
        &self.ctx
    }

    /// Bounded exchange call; a timeout is `default`.
    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = T>, default: T) -> T {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(v) => v,
            Err(_) => {
                warn!(call = what, timeout_secs = self.call_timeout.as_secs(), "exchange call timed out");
                default
            }
        }
    }

    /// One full pass: queued commands, reconciliation, then every symbol.
    pub async fn run_iteration(&mut self) -> IterationReport {
        let mut report = IterationReport::default();

        while let Ok(cmd) = self.control_rx.try_recv() {
            self.apply_control(cmd).await;
        }

        report.reconciled = self.reconcile().await;

        let symbols = self.ctx.config.trading.symbols.clone();
        for symbol in symbols {
            let outcome = match self.process_symbol(&symbol).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(symbol = %symbol, "symbol processing failed: {err:#}");
                    SymbolOutcome::Skipped(err.to_string())
                }
            };
            debug!(symbol = %symbol, ?outcome, "symbol done");
            report.symbols.push((symbol, outcome));
        }

        self.persist_state();
        self.ctx.status.mark_tick(Utc::now());
        report
    }

    async fn reconcile(&self) -> Vec<Position> {
        let ex = self.ctx.exchange.clone();
        let Some(balances) = self.bounded("get_balances", ex.get_balances(), None).await else {
            warn!("balances unavailable, skipping reconciliation this tick");
            return Vec::new();
        };
        let ghosts = self
            .ctx
            .positions
            .sync_with_exchange(&balances, &self.ctx.status.last_prices());
        for pos in &ghosts {
            warn!(symbol = %pos.symbol, "closed ghost position after manual sell");
            self.ctx.notifier.notify_close(pos);
        }
        ghosts
    }

    async fn apply_control(&mut self, cmd: Ctrl) {
        match cmd {
            Ctrl::Pause => {
                self.ctx.status.set_paused(true);
                info!("new entries paused");
                self.ctx.notifier.notify_text("⏸ New entries paused");
            }
            Ctrl::Resume => {
                self.ctx.status.set_paused(false);
                info!("new entries resumed");
                self.ctx.notifier.notify_text("▶️ New entries resumed");
            }
            Ctrl::Close(symbol) => {
                let Some(pos) = self.ctx.positions.get_position(&symbol) else {
                    self.ctx.notifier.notify_text(&format!("No open position for {symbol}"));
                    return;
                };
                let ex = self.ctx.exchange.clone();
                let price = match self.bounded("get_price", ex.get_price(&symbol), None).await {
                    Some(p) => p,
                    None => self.ctx.status.last_price(&symbol).unwrap_or(pos.entry_price),
                };
                if self.exit_position(&pos, CloseReason::ManualClose, price).await.is_none() {
                    self.ctx.notifier.notify_text(&format!("Close of {symbol} was not filled"));
                }
            }
            other => debug!(?other, "read-only command ignored by the loop"),
        }
    }

    async fn process_symbol(&mut self, symbol: &str) -> anyhow::Result<SymbolOutcome> {
        let cfg = self.ctx.config.clone();
        let interval = cfg.trading.candle_interval.as_str();
        let ex = self.ctx.exchange.clone();
        let candles = self
            .bounded("get_klines", ex.get_klines(symbol, interval, cfg.trading.kline_limit), Vec::new())
            .await;
        let Some(snap) = compute_snapshot(symbol, &candles) else {
            warn!(symbol, "no market data this tick");
            return Ok(SymbolOutcome::NoData);
        };
        if !(snap.price > 0.0) {
            return Ok(SymbolOutcome::NoData);
        }

        let now = Utc::now();
        let price = snap.price;
        self.ctx.status.record_price(symbol, price);
        let previous = self.previous.insert(symbol.to_string(), snap.clone());

        self.ctx.performance.resolve_due(symbol, price, now);
        let signals = IndicatorSignals::from_snapshot(&snap, previous.as_ref(), &cfg.performance);
        self.ctx.performance.track_snapshot(symbol, interval, &signals, price, now);

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let reading = self.ctx.regime.classify(&snap, &closes);
        let regime = reading.regime;
        self.ctx.status.record_regime(symbol, reading);

        let vote = self.run_swarm(symbol, &snap)?;

        if let Some(pos) = self.ctx.positions.get_position(symbol) {
            return Ok(self.manage_open(&pos, &snap, previous.as_ref()).await);
        }

        if self.ctx.status.is_paused() {
            return Ok(SymbolOutcome::Skipped("paused".into()));
        }

        let (decision, confidence) = match &self.ctx.causal {
            Some(filter) => {
                let rec = filter.get_causal_recommendation(&vote, &technical_signals(&snap, regime, vote.confidence));
                (rec.decision, rec.confidence)
            }
            None => (vote.final_decision, vote.confidence),
        };
        let side = match (decision, cfg.futures.enabled) {
            (Vote::Buy, true) => Side::Long,
            (Vote::Buy, false) => Side::SpotBuy,
            (Vote::Sell, true) => Side::Short,
            _ => return Ok(SymbolOutcome::Held),
        };

        let active: Vec<String> = IndicatorKind::ALL
            .iter()
            .filter(|k| signals.get(**k))
            .map(|k| k.as_str().to_string())
            .collect();
        let buy_confidence = (!side.is_short()).then(|| self.ctx.performance.buy_confidence(symbol, &signals, interval));
        let momentum = self
            .ctx
            .momentum
            .compute(&snap, self.previous.get(&self.ctx.momentum.reference_symbol))
            .map(|r| r.index);

        Ok(self
            .try_enter(symbol, side, price, regime, confidence, buy_confidence, momentum, active)
            .await)
    }

    fn run_swarm(&self, symbol: &str, snap: &IndicatorSnapshot) -> anyhow::Result<SwarmVote> {
        let mut swarm = self
            .ctx
            .swarm
            .lock()
            .map_err(|e| anyhow::anyhow!("swarm lock poisoned: {e}"))?;
        let vote = swarm.conduct_vote(symbol, snap);
        swarm.run_paper_trading_cycle(symbol, snap);
        drop(swarm);

        if let Err(err) = self.ctx.store.save_swarm_vote(&vote) {
            warn!(symbol, "failed to persist swarm vote: {err:#}");
        }
        Ok(vote)
    }

    /// Writes the agents and the indicator history once per iteration.
    fn persist_state(&self) {
        match self.ctx.swarm.lock() {
            Ok(swarm) => {
                let snapshots = swarm.snapshots();
                drop(swarm);
                if let Err(err) = self.ctx.store.save_worker_snapshots(&snapshots) {
                    warn!("failed to persist swarm agents: {err:#}");
                }
            }
            Err(err) => warn!("swarm lock poisoned, agents not saved: {err}"),
        }
        if let Err(err) = self.ctx.store.save_performance(&self.ctx.performance.snapshot()) {
            warn!("failed to persist indicator history: {err:#}");
        }
    }

    /// Exit checks for an open position: fixed stop, trailing stop, then
    /// signal exits. The first hit is executed.
    async fn manage_open(
        &self,
        pos: &Position,
        snap: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
    ) -> SymbolOutcome {
        let positions = &self.ctx.positions;
        let price = snap.price;
        if let Some(stop) = positions.update_trailing_stop(&pos.symbol, price) {
            info!(symbol = %pos.symbol, stop, "trailing stop raised");
        }

        let reason = if positions.check_fixed_stop_loss(price, pos.entry_price, Some(pos)) {
            Some(CloseReason::StopLoss)
        } else if positions.check_trailing_stop(&pos.symbol, price) {
            Some(CloseReason::TrailingStop)
        } else {
            let check = positions.check_exit_signal(&pos.symbol, snap, previous);
            debug!(symbol = %pos.symbol, profit = check.profit_percent, "exit check");
            check.reason.filter(|_| check.should_exit)
        };

        let Some(reason) = reason else {
            return SymbolOutcome::Held;
        };
        match self.exit_position(pos, reason, price).await {
            Some(_) => SymbolOutcome::Exited(reason),
            None => SymbolOutcome::Skipped(format!("{reason} exit not filled")),
        }
    }

    /// Sends the closing order and records the close on fill. An unfilled
    /// order leaves the position untouched for the next tick.
    async fn exit_position(&self, pos: &Position, reason: CloseReason, price: f64) -> Option<Position> {
        let side = if pos.side.is_short() { OrderSide::Buy } else { OrderSide::Sell };
        let ex = self.ctx.exchange.clone();
        let fill = self
            .bounded("place_market_order", ex.place_market_order(&pos.symbol, side, pos.quantity), None)
            .await;
        let fill = match fill {
            Some(f) if f.is_filled() => f,
            other => {
                warn!(symbol = %pos.symbol, %reason, price, status = ?other.map(|f| f.status), "exit order not filled");
                return None;
            }
        };
        let exit_price = if fill.avg_price > 0.0 { fill.avg_price } else { price };
        let closed = self.ctx.positions.close(&pos.symbol, exit_price, reason)?;
        self.ctx.notifier.notify_close(&closed);
        Some(closed)
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_enter(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        regime: Regime,
        confidence: f64,
        buy_confidence: Option<f64>,
        momentum: Option<f64>,
        signals: Vec<String>,
    ) -> SymbolOutcome {
        let cfg = self.ctx.config.clone();
        if let Err(err) = self.ctx.positions.check_can_open(symbol) {
            return SymbolOutcome::Skipped(err.to_string());
        }

        let ex = self.ctx.exchange.clone();
        let Some(balances) = self.bounded("get_balances", ex.get_balances(), None).await else {
            return SymbolOutcome::Skipped("balances unavailable".into());
        };
        let quote_free = balances.get(&cfg.trading.quote_asset).map(|b| b.free).unwrap_or(0.0);
        let filters = self
            .bounded("get_symbol_filters", ex.get_symbol_filters(symbol), None)
            .await
            .unwrap_or_else(SymbolFilters::default);
        let quantity = match position_quantity(
            quote_free,
            cfg.risk.position_size_percent,
            price,
            &filters,
            cfg.risk.min_order_value,
        ) {
            SizingOutcome::Sized { quantity, .. } => quantity,
            SizingOutcome::BelowMinimum { notional, minimum } => {
                return SymbolOutcome::Skipped(format!("order value {notional:.2} below minimum {minimum:.2}"));
            }
        };

        let leverage = if side == Side::SpotBuy {
            1
        } else {
            cfg.resolve_symbol_params(symbol).leverage
        };
        let req = OpenRequest::spot(symbol, price, quantity)
            .with_side(side)
            .with_leverage(leverage)
            .with_regime(regime)
            .with_signals(signals);
        let plan = match self.ctx.positions.prepare(&req) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(symbol, "entry rejected: {err}");
                return SymbolOutcome::Skipped(err.to_string());
            }
        };

        let ctx = EntryContext {
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            stop_loss_price: plan.stop_loss_price,
            leverage,
            regime,
            decision_confidence: confidence,
            buy_confidence,
            momentum,
        };
        let gates: Vec<Box<dyn Gate>> = vec![
            Box::new(RegimeGate { profile: cfg.regime.profile(regime).clone() }),
            Box::new(ConfidenceGate { min_confidence: cfg.swarm.min_confidence }),
            Box::new(MomentumGate {
                buy_threshold: cfg.momentum.buy_threshold,
                sell_threshold: cfg.momentum.sell_threshold,
            }),
            Box::new(BuyConfidenceGate {
                min_buy_confidence: cfg.performance.min_buy_confidence,
                strong_momentum: cfg.momentum.strong_momentum_threshold,
            }),
            Box::new(LiquidationGuard::from_config(&cfg.futures)),
        ];
        let (ok, reasons) = run_gates(&ctx, &gates);
        if !ok {
            let reason = reasons
                .into_iter()
                .map(|(n, r)| format!("{n}:{r}"))
                .collect::<Vec<_>>()
                .join("|");
            info!(symbol, %side, reason = %reason, "entry blocked by gate");
            return SymbolOutcome::Skipped(reason);
        }

        let order_side = if side.is_short() { OrderSide::Sell } else { OrderSide::Buy };
        let fill = self
            .bounded("place_market_order", ex.place_market_order(symbol, order_side, quantity), None)
            .await;
        let fill = match fill {
            Some(f) if f.is_filled() => f,
            _ => {
                warn!(symbol, %side, quantity, "entry order not filled");
                return SymbolOutcome::Skipped("entry order not filled".into());
            }
        };

        let entry_price = if fill.avg_price > 0.0 { fill.avg_price } else { price };
        let mut req = req;
        req.entry_price = entry_price;
        req.quantity = fill.executed_qty;
        match self.ctx.positions.open(req) {
            Ok(pos) => {
                self.ctx.notifier.notify_open(&pos);
                SymbolOutcome::Entered(side)
            }
            Err(err) => {
                // The fill already happened; the next reconciliation sees the balance.
                error!(symbol, "order filled but position not recorded: {err}");
                SymbolOutcome::Skipped(err.to_string())
            }
        }
    }
}
