//! One tick of the trading loop against a scripted exchange.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use swarm_trader::common::config::BotConfig;
use swarm_trader::common::exchange::{AssetBalance, ExchangeClient, OrderFill, OrderSide, SymbolFilters};
use swarm_trader::universal::engine::{SymbolOutcome, TradingContext, TradingEngine};
use swarm_trader::universal::models::Candle;
use swarm_trader::universal::notify::RecordingNotifier;
use swarm_trader::universal::positions::{CloseReason, OpenRequest, Side};
use swarm_trader::universal::store::{MemoryStore, StateStore};
use swarm_trader::universal::swarm::{StrategyParams, StrategyVariant, SwarmCoordinator, WorkerAgent};
use swarm_trader::universal::telegram::Ctrl;

#[derive(Default)]
struct ScriptedExchange {
    klines: Mutex<HashMap<String, Vec<Candle>>>,
    balances: Mutex<HashMap<String, f64>>,
    orders: Mutex<Vec<(String, OrderSide, f64)>>,
    reject_orders: bool,
}

impl ScriptedExchange {
    fn set_klines(&self, symbol: &str, closes: &[f64]) {
        self.klines.lock().unwrap().insert(symbol.to_string(), candles(closes));
    }

    fn set_balance(&self, asset: &str, amount: f64) {
        self.balances.lock().unwrap().insert(asset.to_string(), amount);
    }

    fn orders(&self) -> Vec<(String, OrderSide, f64)> {
        self.orders.lock().unwrap().clone()
    }

    fn last_close(&self, symbol: &str) -> Option<f64> {
        self.klines.lock().unwrap().get(symbol)?.last().map(|c| c.close)
    }
}

#[async_trait::async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn get_price(&self, symbol: &str) -> Option<f64> {
        self.last_close(symbol)
    }

    async fn get_klines(&self, symbol: &str, _interval: &str, _limit: usize) -> Vec<Candle> {
        self.klines.lock().unwrap().get(symbol).cloned().unwrap_or_default()
    }

    async fn get_balances(&self) -> Option<HashMap<String, AssetBalance>> {
        let b = self.balances.lock().unwrap();
        Some(
            b.iter()
                .map(|(asset, free)| {
                    let balance = AssetBalance {
                        asset: asset.clone(),
                        free: *free,
                        locked: 0.0,
                    };
                    (asset.clone(), balance)
                })
                .collect(),
        )
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Option<OrderFill> {
        self.orders.lock().unwrap().push((symbol.to_string(), side, quantity));
        if self.reject_orders {
            return None;
        }
        Some(OrderFill {
            symbol: symbol.to_string(),
            side,
            status: "FILLED".into(),
            executed_qty: quantity,
            avg_price: self.last_close(symbol)?,
        })
    }

    async fn get_symbol_filters(&self, _symbol: &str) -> Option<SymbolFilters> {
        Some(SymbolFilters::default())
    }
}

fn candles(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Candle {
            open_time: i as i64 * 900_000,
            open: *c,
            high: c + 0.5,
            low: c - 0.5,
            close: *c,
            volume: 1_000.0,
        })
        .collect()
}

/// Forty candles falling one unit each, ending at 101: RSI and %K deeply oversold.
fn falling() -> Vec<f64> {
    (0..40).map(|i| 140.0 - i as f64).collect()
}

fn config() -> BotConfig {
    let mut cfg = BotConfig::default();
    cfg.trading.symbols = vec!["BTCUSDT".into()];
    cfg.swarm.population = 4;
    cfg.regime.enabled = false;
    cfg.performance.min_buy_confidence = 0.4;
    cfg
}

struct Harness {
    engine: TradingEngine,
    control: tokio::sync::mpsc::UnboundedSender<Ctrl>,
    exchange: Arc<ScriptedExchange>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<MemoryStore>,
}

fn harness(cfg: BotConfig, exchange: ScriptedExchange, buyer_swarm: bool) -> Harness {
    let exchange = Arc::new(exchange);
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(MemoryStore::new());
    let mut ctx = TradingContext::new(Arc::new(cfg.clone()), exchange.clone(), store.clone(), notifier.clone());
    if buyer_swarm {
        let agent = WorkerAgent::new(1, StrategyVariant::RsiOnly, StrategyParams::default(), "15m", 1_000.0);
        ctx.swarm = Arc::new(Mutex::new(SwarmCoordinator::with_agents(vec![agent], &cfg.swarm)));
    }
    let (engine, control) = TradingEngine::new(ctx);
    Harness {
        engine,
        control,
        exchange,
        notifier,
        store,
    }
}

fn outcome(report: &swarm_trader::universal::engine::IterationReport) -> &SymbolOutcome {
    &report.symbols[0].1
}

#[tokio::test]
async fn missing_klines_is_no_data() {
    let mut h = harness(config(), ScriptedExchange::default(), false);
    let report = h.engine.run_iteration().await;
    assert_eq!(outcome(&report), &SymbolOutcome::NoData);
    assert_eq!(h.engine.context().status.iterations(), 1);
    assert!(h.engine.context().status.last_tick().is_some());
}

#[tokio::test]
async fn oversold_buy_vote_opens_spot_position() {
    let ex = ScriptedExchange::default();
    ex.set_klines("BTCUSDT", &falling());
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(config(), ex, true);

    let report = h.engine.run_iteration().await;
    assert_eq!(outcome(&report), &SymbolOutcome::Entered(Side::SpotBuy));

    let pos = h.engine.context().positions.get_position("BTCUSDT").unwrap();
    assert_eq!(pos.entry_price, 101.0);
    assert!((pos.quantity * 101.0 - 100.0).abs() < 0.01);
    assert!(pos.signals.contains(&"rsi".to_string()));

    let orders = h.exchange.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1, OrderSide::Buy);
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn iteration_persists_swarm_agents() {
    let ex = ScriptedExchange::default();
    ex.set_klines("BTCUSDT", &falling());
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(config(), ex, true);

    h.engine.run_iteration().await;
    let saved = h.store.get_worker_snapshots().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].open_trades.len(), 1);
    assert!(h.store.get_performance().unwrap().is_some());
}

#[tokio::test]
async fn confidence_gate_blocks_entry() {
    let mut cfg = config();
    cfg.performance.min_buy_confidence = 0.9;
    let ex = ScriptedExchange::default();
    ex.set_klines("BTCUSDT", &falling());
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(cfg, ex, true);

    let report = h.engine.run_iteration().await;
    match outcome(&report) {
        SymbolOutcome::Skipped(reason) => assert!(reason.starts_with("BuyConfidenceGate:"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(h.exchange.orders().is_empty());
    assert!(!h.engine.context().positions.has_open_position("BTCUSDT"));
}

#[tokio::test]
async fn strong_momentum_overrides_confidence_gate() {
    let mut cfg = config();
    cfg.performance.min_buy_confidence = 0.9;
    cfg.momentum.enabled = true;
    cfg.momentum.strong_momentum_threshold = 45.0;
    let ex = ScriptedExchange::default();
    ex.set_klines("BTCUSDT", &falling());
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(cfg, ex, true);

    let report = h.engine.run_iteration().await;
    assert_eq!(outcome(&report), &SymbolOutcome::Entered(Side::SpotBuy));
    assert_eq!(h.exchange.orders().len(), 1);
}

#[tokio::test]
async fn fixed_stop_loss_closes_position() {
    let ex = ScriptedExchange::default();
    let mut closes = vec![100.0; 39];
    closes.push(97.0);
    ex.set_klines("BTCUSDT", &closes);
    ex.set_balance("USDT", 1_000.0);
    ex.set_balance("BTC", 1.0);
    let mut h = harness(config(), ex, false);
    h.engine
        .context()
        .positions
        .open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .unwrap();

    let report = h.engine.run_iteration().await;
    assert!(report.reconciled.is_empty());
    assert_eq!(outcome(&report), &SymbolOutcome::Exited(CloseReason::StopLoss));

    let closed = h.engine.context().positions.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_price, Some(97.0));
    assert_eq!(h.exchange.orders()[0], ("BTCUSDT".to_string(), OrderSide::Sell, 1.0));
}

#[tokio::test]
async fn unfilled_exit_keeps_position_open() {
    let ex = ScriptedExchange {
        reject_orders: true,
        ..ScriptedExchange::default()
    };
    let mut closes = vec![100.0; 39];
    closes.push(97.0);
    ex.set_klines("BTCUSDT", &closes);
    ex.set_balance("BTC", 1.0);
    let mut h = harness(config(), ex, false);
    h.engine
        .context()
        .positions
        .open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .unwrap();

    let report = h.engine.run_iteration().await;
    assert!(matches!(outcome(&report), SymbolOutcome::Skipped(_)));
    assert!(h.engine.context().positions.has_open_position("BTCUSDT"));
}

#[tokio::test]
async fn ghost_position_is_reconciled() {
    let ex = ScriptedExchange::default();
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(config(), ex, false);
    h.engine
        .context()
        .positions
        .open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .unwrap();

    let report = h.engine.run_iteration().await;
    assert_eq!(report.reconciled.len(), 1);
    assert_eq!(report.reconciled[0].close_reason, Some(CloseReason::ManualSellDetected));
    assert!(!h.engine.context().positions.has_open_position("BTCUSDT"));
    assert_eq!(h.notifier.messages().len(), 1);
    assert!(h.exchange.orders().is_empty());
}

#[tokio::test]
async fn pause_blocks_entries_until_resumed() {
    let ex = ScriptedExchange::default();
    ex.set_klines("BTCUSDT", &falling());
    ex.set_balance("USDT", 1_000.0);
    let mut h = harness(config(), ex, true);

    h.control.send(Ctrl::Pause).unwrap();
    let report = h.engine.run_iteration().await;
    assert_eq!(outcome(&report), &SymbolOutcome::Skipped("paused".into()));
    assert!(h.engine.context().status.is_paused());

    h.control.send(Ctrl::Resume).unwrap();
    let report = h.engine.run_iteration().await;
    assert_eq!(outcome(&report), &SymbolOutcome::Entered(Side::SpotBuy));
    assert!(!h.engine.context().status.is_paused());
}

#[tokio::test]
async fn manual_close_command_exits_at_market() {
    let ex = ScriptedExchange::default();
    let mut closes = vec![100.0; 39];
    closes.push(101.0);
    ex.set_klines("BTCUSDT", &closes);
    ex.set_balance("BTC", 1.0);
    let mut h = harness(config(), ex, false);
    h.engine
        .context()
        .positions
        .open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .unwrap();

    h.control.send(Ctrl::Close("BTCUSDT".into())).unwrap();
    h.engine.run_iteration().await;

    let closed = h.engine.context().positions.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].close_reason, Some(CloseReason::ManualClose));
    assert_eq!(closed[0].exit_price, Some(101.0));
}
