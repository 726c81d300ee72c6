//! File-backed state survives a restart.

use std::sync::Arc;

use chrono::Utc;
use swarm_trader::common::config::{PerformanceConfig, SwarmConfig};
use swarm_trader::universal::models::IndicatorSnapshot;
use swarm_trader::universal::performance::{IndicatorSignals, PerformanceLedger};
use swarm_trader::universal::positions::{CloseReason, OpenRequest, PositionManager, RiskSettings};
use swarm_trader::universal::store::{JsonFileStore, StateStore};
use swarm_trader::universal::swarm::SwarmCoordinator;

#[test]
fn positions_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let pm = PositionManager::new(RiskSettings::default(), store);
        pm.open(OpenRequest::spot("BTCUSDT", 100.0, 0.5)).unwrap();
        pm.open(OpenRequest::spot("ETHUSDT", 20.0, 3.0)).unwrap();
        pm.update_trailing_stop("BTCUSDT", 110.0);
        pm.close("ETHUSDT", 21.0, CloseReason::TakeProfit).unwrap();
    }

    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let pm = PositionManager::new(RiskSettings::default(), store.clone());
    assert_eq!(pm.restore().unwrap(), 1);

    let btc = pm.get_position("BTCUSDT").unwrap();
    assert_eq!(btc.quantity, 0.5);
    assert!((btc.trailing_stop.current_stop_percent - 8.0).abs() < 1e-9);
    assert_eq!(btc.trailing_stop.highest_price, Some(110.0));

    let closed = pm.closed_positions();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].symbol, "ETHUSDT");
    assert_eq!(closed[0].close_reason, Some(CloseReason::TakeProfit));
    assert!(!store.get_open_positions().unwrap().contains_key("ETHUSDT"));
}

#[test]
fn swarm_votes_append_and_agents_persist() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    let cfg = SwarmConfig {
        population: 4,
        ..SwarmConfig::default()
    };
    let mut swarm = SwarmCoordinator::new(&cfg);
    let mut snap = IndicatorSnapshot::price_only("BTCUSDT", 100.0);
    snap.rsi = 10.0;

    for _ in 0..3 {
        let vote = swarm.conduct_vote("BTCUSDT", &snap);
        store.save_swarm_vote(&vote).unwrap();
    }
    swarm.run_paper_trading_cycle("BTCUSDT", &snap);
    store.save_worker_snapshots(&swarm.snapshots()).unwrap();

    let votes = store.read_swarm_votes().unwrap();
    assert_eq!(votes.len(), 3);
    let history = swarm.history();
    let last = &history[2];
    assert_eq!(votes[2].timestamp, last.timestamp);
    assert_eq!(votes[2].final_decision, last.final_decision);
    assert_eq!(votes[2].buy_votes, last.buy_votes);

    let mut restored = SwarmCoordinator::new(&cfg);
    assert_eq!(restored.restore(store.get_worker_snapshots().unwrap()), 4);
    for (a, b) in restored.agents().iter().zip(swarm.agents()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.strategy, b.strategy);
        assert_eq!(a.open_trade_count(), b.open_trade_count());
        assert!((a.balance() - b.balance()).abs() < 1e-9);
    }
}

#[test]
fn indicator_history_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path()).unwrap();
    assert!(store.get_performance().unwrap().is_none());

    let ledger = PerformanceLedger::new(&PerformanceConfig::default());
    let signals = IndicatorSignals {
        rsi: true,
        ..IndicatorSignals::default()
    };
    ledger.track_snapshot("BTCUSDT", "15m", &signals, 100.0, Utc::now());
    store.save_performance(&ledger.snapshot()).unwrap();

    let loaded = store.get_performance().unwrap().unwrap();
    assert_eq!(loaded.series.len(), 4);
    assert_eq!(loaded.pending.len(), 4);

    let copy = PerformanceLedger::new(&PerformanceConfig::default());
    copy.restore(loaded);
    assert_eq!(copy.pending_count(), 4);
}

#[test]
fn empty_state_dir_reads_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("nested")).unwrap();
    assert!(store.get_open_positions().unwrap().is_empty());
    assert!(store.get_closed_positions().unwrap().is_empty());
    assert!(store.get_worker_snapshots().unwrap().is_empty());
    assert!(store.read_swarm_votes().unwrap().is_empty());
}
