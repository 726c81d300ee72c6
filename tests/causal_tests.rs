use swarm_trader::common::config::{CausalConfig, CausalEdgeConfig, SwarmConfig};
use swarm_trader::universal::causal::{technical_signals, CausalFilter};
use swarm_trader::universal::models::IndicatorSnapshot;
use swarm_trader::universal::regime::Regime;
use swarm_trader::universal::swarm::{StrategyParams, StrategyVariant, SwarmCoordinator, SwarmVote, Vote, WorkerAgent};

fn unanimous_buy(snap: &IndicatorSnapshot) -> SwarmVote {
    let agent = WorkerAgent::new(1, StrategyVariant::RsiOnly, StrategyParams::default(), "15m", 1_000.0);
    let mut swarm = SwarmCoordinator::with_agents(vec![agent], &SwarmConfig::default());
    swarm.conduct_vote("BTCUSDT", snap)
}

fn oversold() -> IndicatorSnapshot {
    let mut snap = IndicatorSnapshot::price_only("BTCUSDT", 100.0);
    snap.rsi = 10.0;
    snap
}

fn edge(from: &str, weight: f64) -> CausalEdgeConfig {
    CausalEdgeConfig {
        from: from.into(),
        to: "price_change".into(),
        weight,
    }
}

#[test]
fn built_in_graph_holds_a_unanimous_buy() {
    let snap = oversold();
    let vote = unanimous_buy(&snap);
    assert_eq!(vote.final_decision, Vote::Buy);

    let filter = CausalFilter::from_config(&CausalConfig::default());
    let rec = filter.get_causal_recommendation(&vote, &technical_signals(&snap, Regime::Sideways, vote.confidence));

    // market_regime is confounded by ema_alignment and drops below the threshold.
    assert_eq!(rec.true_signals, 2);
    let causal = (0.82 * 0.71 + 0.54) * 10.0;
    assert!((rec.causal_confidence - causal).abs() < 1e-9);
    assert!((rec.confidence - (causal * 0.6 + 100.0 * 0.4)).abs() < 1e-9);
    assert_eq!(rec.decision, Vote::Hold);
    assert!(rec.signals.iter().any(|s| s.indicator == "rsi" && s.is_spurious));
}

#[test]
fn tuned_graph_lets_the_vote_through() {
    let cfg = CausalConfig {
        enabled: true,
        edges: vec![edge("rsi", 0.9), edge("swarm_confidence", 0.9)],
        causal_scale: 50.0,
        ..CausalConfig::default()
    };
    let snap = oversold();
    let vote = unanimous_buy(&snap);
    let filter = CausalFilter::from_config(&cfg);
    let rec = filter.get_causal_recommendation(&vote, &technical_signals(&snap, Regime::Bull, vote.confidence));

    assert_eq!(rec.true_signals, 2);
    assert!((rec.causal_confidence - 90.0).abs() < 1e-9);
    assert!((rec.confidence - 94.0).abs() < 1e-9);
    assert_eq!(rec.decision, Vote::Buy);
}

#[test]
fn drivers_and_export_describe_the_graph() {
    let filter = CausalFilter::from_config(&CausalConfig::default());
    let drivers = filter.market_drivers("BTCUSDT");
    let names: Vec<&str> = drivers.drivers.iter().map(|d| d.driver.as_str()).collect();
    assert_eq!(
        names,
        ["sentiment_score", "whale_activity", "btc_correlation", "ema_alignment", "swarm_confidence"]
    );
    assert!(drivers
        .drivers
        .windows(2)
        .all(|w| w[0].strength >= w[1].strength));

    let export = filter.export();
    assert_eq!(export.edges.len(), 13);
    let whale = export.nodes.iter().find(|n| n.id == "whale_activity").unwrap();
    assert_eq!((whale.in_degree, whale.out_degree), (1, 2));
    let strong = export.edges.iter().filter(|e| e.strength == "strong").count();
    assert_eq!(strong, 9);
}
