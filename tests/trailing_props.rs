//! Trailing stop ratchet properties.
//!
//! Whatever the price path, the stop level of a position never moves
//! against it: up-only for longs, down-only for shorts.

use std::sync::Arc;

use proptest::prelude::*;
use swarm_trader::universal::positions::{OpenRequest, PositionManager, RiskSettings, Side};
use swarm_trader::universal::store::MemoryStore;

fn stop_of(pm: &PositionManager) -> f64 {
    pm.get_position("BTCUSDT")
        .map(|p| p.trailing_stop.current_stop_percent)
        .unwrap_or(f64::NAN)
}

fn run_path(side: Side, prices: &[f64]) -> Vec<f64> {
    let pm = PositionManager::new(RiskSettings::default(), Arc::new(MemoryStore::new()));
    pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0).with_side(side))
        .expect("open should succeed");
    let mut stops = vec![stop_of(&pm)];
    for price in prices {
        let before = stop_of(&pm);
        let moved = pm.update_trailing_stop("BTCUSDT", *price);
        let after = stop_of(&pm);
        match moved {
            Some(stop) => assert_eq!(stop, after),
            None => assert_eq!(before, after),
        }
        stops.push(after);
    }
    stops
}

proptest! {
    #[test]
    fn long_stop_never_loosens(prices in prop::collection::vec(50.0f64..150.0, 1..60)) {
        let stops = run_path(Side::Long, &prices);
        for pair in stops.windows(2) {
            prop_assert!(pair[1] >= pair[0], "stop fell from {} to {}", pair[0], pair[1]);
        }
        prop_assert!(stops[stops.len() - 1] >= -2.0);
    }

    #[test]
    fn short_stop_never_loosens(prices in prop::collection::vec(50.0f64..150.0, 1..60)) {
        let stops = run_path(Side::Short, &prices);
        for pair in stops.windows(2) {
            prop_assert!(pair[1] <= pair[0], "stop rose from {} to {}", pair[0], pair[1]);
        }
        prop_assert!(stops[stops.len() - 1] <= 2.0);
    }

    #[test]
    fn stop_stays_below_best_price_by_trail(prices in prop::collection::vec(90.0f64..130.0, 1..40)) {
        let pm = PositionManager::new(RiskSettings::default(), Arc::new(MemoryStore::new()));
        pm.open(OpenRequest::spot("BTCUSDT", 100.0, 1.0)).expect("open should succeed");
        for price in &prices {
            pm.update_trailing_stop("BTCUSDT", *price);
        }
        let pos = pm.get_position("BTCUSDT").expect("still open");
        let best = pos.trailing_stop.highest_price.unwrap_or(100.0);
        let best_change = (best - 100.0) / 100.0 * 100.0;
        prop_assert!(pos.trailing_stop.current_stop_percent <= best_change - 2.0 + 1e-9
            || pos.trailing_stop.current_stop_percent == -2.0);
    }
}
