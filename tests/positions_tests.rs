//! Integration tests for the position manager.
//!
//! These exercise the invariants we care about:
//! - No duplicate open positions per symbol until the position is closed.
//! - Stops, targets and the trailing ratchet behave as configured.
//! - Leveraged entries never open with a stop inside the liquidation buffer.

use std::collections::HashMap;
use std::sync::Arc;

use swarm_trader::common::exchange::AssetBalance;
use swarm_trader::universal::models::IndicatorSnapshot;
use swarm_trader::universal::positions::{
    CloseReason, OpenRequest, PositionError, PositionManager, RiskSettings, Side,
};
use swarm_trader::universal::regime::Regime;
use swarm_trader::universal::store::{MemoryStore, StateStore};

fn manager() -> PositionManager {
    PositionManager::new(RiskSettings::default(), Arc::new(MemoryStore::new()))
}

fn manager_with_store() -> (PositionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (PositionManager::new(RiskSettings::default(), store.clone()), store)
}

#[test]
fn fresh_manager_allows_opening_position() {
    let pm = manager();

    assert!(pm.can_open("BTCUSDT"));
    assert!(pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).is_ok());
}

#[test]
fn duplicate_open_is_blocked_until_closed() {
    let pm = manager();

    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .expect("initial open should succeed");

    assert!(!pm.can_open("BTCUSDT"));
    let open_again = pm.open(OpenRequest::spot("BTCUSDT", 101.0, 1.0));
    assert!(matches!(open_again, Err(PositionError::AlreadyOpen(symbol)) if symbol == "BTCUSDT"));
}

#[test]
fn closing_position_allows_reopen() {
    let pm = manager();

    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0))
        .expect("initial open should succeed");
    pm.close("BTCUSDT", 101.0, CloseReason::TakeProfit)
        .expect("closing existing position should succeed");

    assert!(pm.can_open("BTCUSDT"));
    assert!(pm.open(OpenRequest::spot("BTCUSDT", 102.0, 1.0)).is_ok());
}

#[test]
fn closing_non_open_position_is_a_noop() {
    let pm = manager();
    pm.open(OpenRequest::spot("ETHUSDT", 50.0, 2.0)).unwrap();
    let before = pm.get_position("ETHUSDT").unwrap();

    assert!(pm.close("BTCUSDT", 100.0, CloseReason::StopLoss).is_none());

    let after = pm.get_position("ETHUSDT").unwrap();
    assert_eq!(before.entry_price, after.entry_price);
    assert_eq!(before.trailing_stop, after.trailing_stop);
    assert!(pm.closed_positions().is_empty());
}

#[test]
fn portfolio_cap_blocks_new_symbols() {
    let pm = manager();
    for s in ["AUSDT", "BUSDT", "CUSDT"] {
        pm.open(OpenRequest::spot(s, 10.0, 1.0)).unwrap();
    }
    assert!(!pm.can_open("DUSDT"));
    assert!(matches!(
        pm.check_can_open("DUSDT"),
        Err(PositionError::MaxPositions { open: 3, max: 3 })
    ));
}

#[test]
fn take_profit_and_fixed_stop_scenario() {
    let pm = manager();
    let pos = pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_side(Side::Long)).unwrap();
    assert_eq!(pos.stop_loss_percent, 2.0);
    assert_eq!(pos.take_profit_percent, 4.0);

    let check = pm.check_exit_signal("BTCUSDT", &IndicatorSnapshot::price_only("BTCUSDT", 104.0), None);
    assert!(check.should_exit);
    assert_eq!(check.reason, Some(CloseReason::TakeProfit));
    assert!((check.profit_percent - 4.0).abs() < 1e-9);

    assert!(pm.check_fixed_stop_loss(98.0, 100.0, Some(&pos)));
    assert!(!pm.check_fixed_stop_loss(98.5, 100.0, Some(&pos)));
}

#[test]
fn trailing_stop_scenario() {
    let pm = manager();
    let pos = pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_side(Side::Long)).unwrap();
    assert_eq!(pos.trailing_stop.current_stop_percent, -2.0);

    // Below activation nothing moves.
    assert_eq!(pm.update_trailing_stop("BTCUSDT", 102.0), None);

    let stop = pm.update_trailing_stop("BTCUSDT", 105.0).expect("stop should ratchet");
    assert!((stop - 3.0).abs() < 1e-9);
    assert!(!pm.check_trailing_stop("BTCUSDT", 104.0));
    assert!(pm.check_trailing_stop("BTCUSDT", 102.0));

    // A lower price never loosens the stop.
    assert_eq!(pm.update_trailing_stop("BTCUSDT", 103.5), None);
    let ts = pm.get_position("BTCUSDT").unwrap().trailing_stop;
    assert!((ts.current_stop_percent - 3.0).abs() < 1e-9);
    assert_eq!(ts.highest_price, Some(105.0));
}

#[test]
fn short_trailing_stop_mirrors_long() {
    let pm = manager();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_side(Side::Short)).unwrap();
    let stop = pm.update_trailing_stop("BTCUSDT", 95.0).expect("stop should ratchet");
    assert!((stop - -3.0).abs() < 1e-9);
    assert!(!pm.check_trailing_stop("BTCUSDT", 96.0));
    assert!(pm.check_trailing_stop("BTCUSDT", 97.5));
    assert_eq!(pm.update_trailing_stop("BTCUSDT", 96.0), None);
}

#[test]
fn reopen_starts_with_fresh_trailing_state() {
    let pm = manager();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();
    pm.update_trailing_stop("BTCUSDT", 110.0);
    pm.close("BTCUSDT", 109.0, CloseReason::TrailingStop).unwrap();

    let fresh = pm.open(OpenRequest::spot("BTCUSDT", 200.0, 1.0)).unwrap();
    assert_eq!(fresh.trailing_stop.current_stop_percent, -2.0);
    assert_eq!(fresh.trailing_stop.highest_price, Some(200.0));
    assert!(fresh.exit_price.is_none());
}

#[test]
fn regime_scales_stop_and_target() {
    let pm = manager();
    let bull = pm
        .open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_regime(Regime::Bull))
        .unwrap();
    assert!((bull.stop_loss_percent - 3.0).abs() < 1e-9);
    assert!((bull.take_profit_percent - 4.0).abs() < 1e-9);

    let bear = pm
        .open(OpenRequest::spot("ETHUSDT", 100.0, 1.0).with_regime(Regime::Bear))
        .unwrap();
    assert!((bear.stop_loss_percent - 1.4).abs() < 1e-9);
    assert!((bear.take_profit_percent - 3.2).abs() < 1e-9);
}

#[test]
fn leveraged_open_rejected_inside_liquidation_buffer() {
    let mut settings = RiskSettings::default();
    settings.stop_loss_percent = 40.0;
    let pm = PositionManager::new(settings, Arc::new(MemoryStore::new()));

    // 2x long: liquidation ~50.4, required stop >= ~52.9, stop at 60 passes.
    let ok = pm.open(
        OpenRequest::spot("BTCUSDT", 100.0, 1.0)
            .with_side(Side::Long)
            .with_leverage(2),
    );
    assert!(ok.is_ok(), "{ok:?}");

    // 3x long: liquidation ~67.1, stop at 60 is inside the buffer.
    let rejected = pm.open(
        OpenRequest::spot("ETHUSDT", 100.0, 1.0)
            .with_side(Side::Long)
            .with_leverage(3),
    );
    assert!(matches!(rejected, Err(PositionError::LiquidationBuffer { .. })));
    assert!(pm.get_position("ETHUSDT").is_none());
}

#[test]
fn leveraged_short_rejected_inside_liquidation_buffer() {
    let mut settings = RiskSettings::default();
    settings.stop_loss_percent = 40.0;
    let pm = PositionManager::new(settings, Arc::new(MemoryStore::new()));

    // 2x short: liquidation ~149.6, stop must sit at or below ~142.1; 140 passes.
    let ok = pm.open(
        OpenRequest::spot("BTCUSDT", 100.0, 1.0)
            .with_side(Side::Short)
            .with_leverage(2),
    );
    let pos = ok.unwrap();
    assert!((pos.stop_loss_price() - 140.0).abs() < 1e-9);

    // 3x short: liquidation ~132.9, stop at 140 lies beyond ~126.3.
    let rejected = pm.open(
        OpenRequest::spot("ETHUSDT", 100.0, 1.0)
            .with_side(Side::Short)
            .with_leverage(3),
    );
    assert!(matches!(rejected, Err(PositionError::LiquidationBuffer { .. })));
    assert!(pm.get_position("ETHUSDT").is_none());
}

#[test]
fn spot_positions_cannot_be_leveraged() {
    let pm = manager();
    let res = pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_leverage(3));
    assert!(matches!(res, Err(PositionError::InvalidRequest(_))));
}

#[test]
fn leveraged_close_uses_margin_for_usd_pnl() {
    let pm = manager();
    pm.open(
        OpenRequest::spot("BTCUSDT", 100.0, 2.0)
            .with_side(Side::Long)
            .with_leverage(2),
    )
    .unwrap();
    let closed = pm.close("BTCUSDT", 101.0, CloseReason::TakeProfit).unwrap();
    // 1% move at 2x is 2%, on 100 USD of margin.
    assert!((closed.realized_pnl_percent.unwrap() - 2.0).abs() < 1e-9);
    assert!((closed.realized_pnl_usd.unwrap() - 2.0).abs() < 1e-9);
}

#[test]
fn rsi_and_macd_exits_follow_priority() {
    let pm = manager();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();

    let mut snap = IndicatorSnapshot::price_only("BTCUSDT", 101.0);
    snap.rsi = 75.0;
    let check = pm.check_exit_signal("BTCUSDT", &snap, None);
    assert_eq!(check.reason, Some(CloseReason::RsiOverbought));

    let mut prev = IndicatorSnapshot::price_only("BTCUSDT", 101.0);
    prev.macd = 1.0;
    prev.macd_signal = 0.5;
    snap.rsi = 55.0;
    snap.macd = 0.4;
    snap.macd_signal = 0.6;
    let check = pm.check_exit_signal("BTCUSDT", &snap, Some(&prev));
    assert_eq!(check.reason, Some(CloseReason::MacdBearishCross));

    let check = pm.check_exit_signal("BTCUSDT", &snap, None);
    assert!(!check.should_exit);
}

#[test]
fn sync_closes_positions_missing_on_exchange() {
    let (pm, store) = manager_with_store();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();
    pm.open(OpenRequest::spot("ETHUSDT", 10.0, 5.0)).unwrap();

    let mut balances = HashMap::new();
    balances.insert(
        "BTC".to_string(),
        AssetBalance { asset: "BTC".into(), free: 0.996, locked: 0.0 },
    );
    let mut prices = HashMap::new();
    prices.insert("ETHUSDT".to_string(), 12.0);

    let ghosts = pm.sync_with_exchange(&balances, &prices);
    assert_eq!(ghosts.len(), 1);
    assert_eq!(ghosts[0].symbol, "ETHUSDT");
    assert_eq!(ghosts[0].close_reason, Some(CloseReason::ManualSellDetected));
    assert_eq!(ghosts[0].exit_price, Some(12.0));

    assert!(pm.has_open_position("BTCUSDT"));
    assert!(!pm.has_open_position("ETHUSDT"));
    assert!(!store.get_open_positions().unwrap().contains_key("ETHUSDT"));
    assert_eq!(store.get_closed_positions().unwrap().len(), 1);
}

#[test]
fn sync_leaves_futures_positions_alone() {
    let (pm, store) = manager_with_store();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_side(Side::Long).with_leverage(2))
        .unwrap();
    pm.open(OpenRequest::spot("ETHUSDT", 10.0, 5.0).with_side(Side::Short).with_leverage(2))
        .unwrap();
    pm.open(OpenRequest::spot("SOLUSDT", 20.0, 2.0)).unwrap();

    let ghosts = pm.sync_with_exchange(&HashMap::new(), &HashMap::new());
    assert_eq!(ghosts.len(), 1);
    assert_eq!(ghosts[0].symbol, "SOLUSDT");
    assert!(pm.has_open_position("BTCUSDT"));
    assert!(pm.has_open_position("ETHUSDT"));
    assert_eq!(store.get_closed_positions().unwrap().len(), 1);
}

#[test]
fn restore_reloads_open_positions() {
    let store = Arc::new(MemoryStore::new());
    let first = PositionManager::new(RiskSettings::default(), store.clone());
    first.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();
    first.update_trailing_stop("BTCUSDT", 106.0);

    let second = PositionManager::new(RiskSettings::default(), store);
    assert_eq!(second.restore().unwrap(), 1);
    let pos = second.get_position("BTCUSDT").unwrap();
    assert!((pos.trailing_stop.current_stop_percent - 4.0).abs() < 1e-9);
    assert!(!second.can_open("BTCUSDT"));
}

#[test]
fn stats_summarise_closed_trades() {
    let pm = manager();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();
    pm.close("BTCUSDT", 110.0, CloseReason::TakeProfit).unwrap();
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).unwrap();
    pm.close("BTCUSDT", 95.0, CloseReason::StopLoss).unwrap();

    let stats = pm.stats();
    assert_eq!(stats.total_trades, 2);
    assert_eq!(stats.winning_trades, 1);
    assert!((stats.total_pnl_usd - 5.0).abs() < 1e-9);
    assert_eq!(stats.best_trade_percent, Some(10.0));
    assert_eq!(stats.worst_trade_percent, Some(-5.0));
    assert!((stats.win_rate() - 50.0).abs() < 1e-9);
}
