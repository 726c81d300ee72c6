//! Swarm voting and paper trading.

use chrono::{Duration, Utc};
use swarm_trader::common::config::SwarmConfig;
use swarm_trader::universal::models::IndicatorSnapshot;
use swarm_trader::universal::swarm::{
    AgentSnapshot, AgentTotals, PaperTrade, PaperTradeStatus, StrategyParams, StrategyVariant, SwarmCoordinator, Vote,
    WorkerAgent,
};

fn closed_trade(agent_id: u32, profit: f64, hours_ago: i64) -> PaperTrade {
    let now = Utc::now();
    PaperTrade {
        agent_id,
        symbol: "BTCUSDT".into(),
        entry_price: 100.0,
        quantity: 1.0,
        entry_time: now - Duration::hours(hours_ago + 1),
        exit_price: Some(100.0 + profit),
        exit_time: Some(now - Duration::hours(hours_ago)),
        profit_loss: profit,
        profit_percent: profit,
        status: PaperTradeStatus::Closed,
    }
}

fn agent_with_history(id: u32, strategy: StrategyVariant, profits: &[f64]) -> WorkerAgent {
    WorkerAgent::from_snapshot(
        AgentSnapshot {
            id,
            strategy,
            params: StrategyParams::default(),
            timeframe: "15m".into(),
            balance: 1_000.0,
            open_trades: Vec::new(),
            closed_trades: profits.iter().map(|p| closed_trade(id, *p, 1)).collect(),
            archived: AgentTotals::default(),
        },
        1_000.0,
    )
}

fn config(population: usize) -> SwarmConfig {
    SwarmConfig {
        population,
        ..SwarmConfig::default()
    }
}

#[test]
fn weighted_vote_three_to_one() {
    // +200 in 24h => weight 3.0; flat => weight 1.0. Both at 50% win rate.
    let buyer = agent_with_history(1, StrategyVariant::RsiOnly, &[50.0, 50.0, 50.0, 50.0, 50.0, -10.0, -10.0, -10.0, -10.0, -10.0]);
    let seller = agent_with_history(2, StrategyVariant::StochOnly, &[10.0, 10.0, 10.0, 10.0, 10.0, -10.0, -10.0, -10.0, -10.0, -10.0]);
    let mut swarm = SwarmCoordinator::with_agents(vec![buyer, seller], &config(2));

    let mut snap = IndicatorSnapshot::price_only("BTCUSDT", 100.0);
    snap.rsi = 10.0;
    snap.stoch_k = 90.0;
    let vote = swarm.conduct_vote("BTCUSDT", &snap);

    assert_eq!(vote.final_decision, Vote::Buy);
    assert!((vote.buy_weight - 3.0).abs() < 1e-9);
    assert!((vote.sell_weight - 1.0).abs() < 1e-9);
    assert!((vote.confidence - 75.0).abs() < 1e-9);
    assert_eq!((vote.buy_votes, vote.sell_votes, vote.hold_votes), (1, 1, 0));
    assert_eq!(vote.top_performers[0], 1);
}

#[test]
fn all_hold_population_is_fully_confident_hold() {
    let mut swarm = SwarmCoordinator::new(&config(30));
    let vote = swarm.conduct_vote("BTCUSDT", &IndicatorSnapshot::price_only("BTCUSDT", 100.0));
    assert_eq!(vote.final_decision, Vote::Hold);
    assert_eq!(vote.hold_votes, 30);
    assert!((vote.confidence - 100.0).abs() < 1e-9);
}

#[test]
fn empty_population_holds_with_zero_confidence() {
    let mut swarm = SwarmCoordinator::with_agents(Vec::new(), &config(1));
    let vote = swarm.conduct_vote("BTCUSDT", &IndicatorSnapshot::price_only("BTCUSDT", 100.0));
    assert_eq!(vote.final_decision, Vote::Hold);
    assert_eq!(vote.confidence, 0.0);
    assert_eq!(vote.total_agents, 0);
}

#[test]
fn weights_stay_in_bounds() {
    let big_winner = agent_with_history(1, StrategyVariant::RsiOnly, &[1_000.0; 10]);
    let big_loser = agent_with_history(2, StrategyVariant::RsiOnly, &[-1_000.0; 10]);
    let mut swarm = SwarmCoordinator::with_agents(vec![big_winner, big_loser], &config(2));
    swarm.conduct_vote("BTCUSDT", &IndicatorSnapshot::price_only("BTCUSDT", 100.0));
    for a in swarm.agents() {
        assert!((0.1..=5.0).contains(&a.vote_weight()), "weight {}", a.vote_weight());
    }
    // 1 + 3 capped, x1.2 for win rate => 4.8.
    assert!((swarm.agents()[0].vote_weight() - 4.8).abs() < 1e-9);
    assert!((swarm.agents()[1].vote_weight() - 0.1).abs() < 1e-9);
}

#[test]
fn old_profits_do_not_count_as_recent() {
    let mut agent = WorkerAgent::from_snapshot(
        AgentSnapshot {
            id: 7,
            strategy: StrategyVariant::RsiOnly,
            params: StrategyParams::default(),
            timeframe: "1h".into(),
            balance: 1_500.0,
            open_trades: Vec::new(),
            closed_trades: (0..6).map(|_| closed_trade(7, 100.0, 48)).collect(),
            archived: AgentTotals::default(),
        },
        1_000.0,
    );
    let weight = agent.update_vote_weight(Utc::now());
    assert_eq!(agent.performance().last_24h_profit, 0.0);
    assert!((agent.performance().last_7d_profit - 600.0).abs() < 1e-9);
    // Base 1.0 x1.2 for a perfect win rate.
    assert!((weight - 1.2).abs() < 1e-9);
}

#[test]
fn paper_cycle_opens_and_closes_per_agent() {
    let buyer = WorkerAgent::new(1, StrategyVariant::RsiOnly, StrategyParams::default(), "15m", 1_000.0);
    let mut swarm = SwarmCoordinator::with_agents(vec![buyer], &config(1));

    let mut oversold = IndicatorSnapshot::price_only("BTCUSDT", 100.0);
    oversold.rsi = 10.0;
    let report = swarm.run_paper_trading_cycle("BTCUSDT", &oversold);
    assert_eq!(report.opened.len(), 1);
    assert!((report.opened[0].quantity - 9.5).abs() < 1e-9);

    // Still oversold: no second trade on the same symbol.
    let report = swarm.run_paper_trading_cycle("BTCUSDT", &oversold);
    assert!(report.opened.is_empty());

    let mut overbought = IndicatorSnapshot::price_only("BTCUSDT", 110.0);
    overbought.rsi = 90.0;
    let report = swarm.run_paper_trading_cycle("BTCUSDT", &overbought);
    assert_eq!(report.closed.len(), 1);
    assert!((report.closed[0].profit_loss - 95.0).abs() < 1e-9);

    let stats = swarm.stats();
    assert_eq!(stats.profitable_agents, 1);
    assert!((stats.total_profit - 95.0).abs() < 1e-9);
    let details = swarm.agent_details(1).unwrap();
    assert_eq!(details.closed_trades, 1);
    assert_eq!(details.open_trades, 0);
}

#[test]
fn restore_keeps_history_and_recomputes_weights() {
    let mut swarm = SwarmCoordinator::new(&config(3));
    let mut snaps = swarm.snapshots();
    snaps[0].closed_trades = (0..5).map(|_| closed_trade(snaps[0].id, 100.0, 1)).collect();
    snaps.push(AgentSnapshot {
        id: 999,
        ..snaps[1].clone()
    });

    assert_eq!(swarm.restore(snaps), 3);
    assert_eq!(swarm.agents().len(), 3);
    let restored = &swarm.agents()[0];
    assert_eq!(restored.closed_trades().len(), 5);
    // 500 in 24h => 1 + 3 (capped), x1.2 for win rate.
    assert!((restored.vote_weight() - 4.8).abs() < 1e-9);
}

#[test]
fn vote_history_is_capped_and_queryable() {
    let cfg = SwarmConfig {
        population: 2,
        history_limit: 3,
        ..SwarmConfig::default()
    };
    let mut swarm = SwarmCoordinator::new(&cfg);
    let snap = IndicatorSnapshot::price_only("BTCUSDT", 100.0);
    for _ in 0..5 {
        swarm.conduct_vote("BTCUSDT", &snap);
    }
    swarm.conduct_vote("ETHUSDT", &IndicatorSnapshot::price_only("ETHUSDT", 10.0));
    assert_eq!(swarm.history().len(), 3);
    assert_eq!(swarm.last_vote("ETHUSDT").unwrap().symbol, "ETHUSDT");
    assert!(swarm.last_vote("BTCUSDT").is_some());
    assert!(swarm.last_vote("XRPUSDT").is_none());
}
