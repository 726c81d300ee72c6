//! Heuristic causal scoring of live technical signals.
//!
//! A small directed graph of market variables with fixed edge weights. A
//! signal's causal effect on the outcome is the sum over all simple paths of
//! the product of edge weights, discounted flat when any confounder exists.
//! Weights are configuration, not fitted values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::IndicatorSnapshot;
use super::regime::Regime;
use super::swarm::{SwarmVote, Vote};
use crate::common::config::{CausalConfig, CausalEdgeConfig};

const VARIABLES: [&str; 12] = [
    "rsi",
    "stochastic",
    "macd",
    "bb_position",
    "volume_ratio",
    "price_change",
    "ema_alignment",
    "market_regime",
    "sentiment_score",
    "btc_correlation",
    "swarm_confidence",
    "whale_activity",
];

/// Built-in plausibility graph.
pub fn default_edges() -> Vec<CausalEdgeConfig> {
    [
        ("whale_activity", "volume_ratio", 0.85),
        ("whale_activity", "price_change", 0.72),
        ("volume_ratio", "price_change", 0.68),
        ("price_change", "rsi", 0.91),
        ("price_change", "macd", 0.88),
        ("price_change", "stochastic", 0.84),
        ("price_change", "bb_position", 0.79),
        ("sentiment_score", "whale_activity", 0.63),
        ("sentiment_score", "volume_ratio", 0.58),
        ("btc_correlation", "price_change", 0.76),
        ("market_regime", "price_change", 0.71),
        ("ema_alignment", "market_regime", 0.82),
        ("swarm_confidence", "price_change", 0.54),
    ]
    .into_iter()
    .map(|(from, to, weight)| CausalEdgeConfig {
        from: from.to_string(),
        to: to.to_string(),
        weight,
    })
    .collect()
}

#[derive(Debug, Clone, Default)]
pub struct CausalGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges(edges: &[CausalEdgeConfig]) -> Self {
        let mut g = Self::new();
        for v in VARIABLES {
            g.add_node(v);
        }
        for e in edges {
            g.add_edge(&e.from, &e.to, e.weight);
        }
        g
    }

    pub fn add_node(&mut self, node: &str) {
        self.nodes.insert(node.to_string());
    }

    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64) {
        self.add_node(from);
        self.add_node(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), weight);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn weight(&self, from: &str, to: &str) -> Option<f64> {
        self.edges.get(from)?.get(to).copied()
    }

    pub fn out_degree(&self, node: &str) -> usize {
        self.edges.get(node).map(|e| e.len()).unwrap_or(0)
    }

    pub fn in_degree(&self, node: &str) -> usize {
        self.edges.values().filter(|e| e.contains_key(node)).count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|e| e.len()).sum()
    }

    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return self.contains(from);
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            for next in self.edges.get(node).into_iter().flat_map(|e| e.keys()) {
                if next == to {
                    return true;
                }
                stack.push(next.as_str());
            }
        }
        false
    }

    /// Every simple (cycle-free) directed path from `from` to `to`.
    pub fn simple_paths(&self, from: &str, to: &str) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut path = vec![from.to_string()];
        self.walk(to, &mut path, &mut out);
        out
    }

    fn walk(&self, to: &str, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        let Some(last) = path.last().cloned() else {
            return;
        };
        for next in self.edges.get(&last).into_iter().flat_map(|e| e.keys()) {
            if path.iter().any(|p| p == next) {
                continue;
            }
            path.push(next.clone());
            if next == to {
                out.push(path.clone());
            } else {
                self.walk(to, path, out);
            }
            path.pop();
        }
    }

    /// Variables with a directed path to both `treatment` and `outcome`.
    pub fn confounders(&self, treatment: &str, outcome: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.as_str() != treatment && n.as_str() != outcome)
            .filter(|n| self.has_path(n, treatment) && self.has_path(n, outcome))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEffect {
    pub path: Vec<String>,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalEffect {
    pub treatment: String,
    pub outcome: String,
    pub effect: f64,
    pub confidence: f64,
    pub is_causal: bool,
    pub paths: Vec<PathEffect>,
    pub confounders: Vec<String>,
}

/// One live signal judged by the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAssessment {
    pub indicator: String,
    pub value: f64,
    pub effect: f64,
    pub is_spurious: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRecommendation {
    pub decision: Vote,
    /// Blended confidence, 0-100.
    pub confidence: f64,
    pub causal_confidence: f64,
    pub swarm_confidence: f64,
    pub true_signals: usize,
    pub filtered_spurious: usize,
    pub signals: Vec<SignalAssessment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDriver {
    pub driver: String,
    pub strength: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDrivers {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub drivers: Vec<MarketDriver>,
    pub total_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub in_degree: usize,
    pub out_degree: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub strength: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub generated_at: DateTime<Utc>,
}

/// Live values for the graph variables the bot can observe.
///
/// Missing readings are left out, so they count neither as true nor as
/// spurious signals.
pub fn technical_signals(snap: &IndicatorSnapshot, regime: Regime, swarm_confidence: f64) -> BTreeMap<String, f64> {
    let regime_value = match regime {
        Regime::Bull => 1.0,
        Regime::Bear => -1.0,
        Regime::Sideways => 0.0,
    };
    [
        ("rsi", snap.rsi),
        ("stochastic", snap.stoch_k),
        ("macd", snap.macd_hist),
        ("bb_position", snap.bb_position()),
        ("volume_ratio", snap.volume_ratio),
        ("ema_alignment", snap.ema_alignment()),
        ("market_regime", regime_value),
        ("swarm_confidence", swarm_confidence),
    ]
    .into_iter()
    .filter(|(_, v)| v.is_finite())
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Discounts swarm decisions whose supporting signals are not causal.
#[derive(Debug, Clone)]
pub struct CausalFilter {
    graph: CausalGraph,
    outcome: String,
    spurious_threshold: f64,
    confounder_discount: f64,
    causal_weight: f64,
    swarm_weight: f64,
    causal_scale: f64,
    min_confidence: f64,
}

impl CausalFilter {
    pub fn from_config(cfg: &CausalConfig) -> Self {
        let edges = if cfg.edges.is_empty() { default_edges() } else { cfg.edges.clone() };
        Self {
            graph: CausalGraph::from_edges(&edges),
            outcome: cfg.outcome.clone(),
            spurious_threshold: cfg.spurious_threshold,
            confounder_discount: cfg.confounder_discount,
            causal_weight: cfg.causal_weight,
            swarm_weight: cfg.swarm_weight,
            causal_scale: cfg.causal_scale,
            min_confidence: cfg.min_confidence,
        }
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    /// Effect of `treatment` on the configured outcome.
    pub fn causal_effect(&self, treatment: &str) -> CausalEffect {
        let outcome = self.outcome.as_str();
        let no_path = CausalEffect {
            treatment: treatment.to_string(),
            outcome: outcome.to_string(),
            effect: 0.0,
            confidence: 0.0,
            is_causal: false,
            paths: Vec::new(),
            confounders: Vec::new(),
        };
        if !self.graph.contains(treatment) || !self.graph.has_path(treatment, outcome) {
            return no_path;
        }

        let paths: Vec<PathEffect> = self
            .graph
            .simple_paths(treatment, outcome)
            .into_iter()
            .map(|path| {
                let strength = path
                    .windows(2)
                    .map(|w| self.graph.weight(&w[0], &w[1]).unwrap_or(0.0))
                    .product();
                PathEffect { path, strength }
            })
            .collect();
        let raw: f64 = paths.iter().map(|p| p.strength).sum();
        let confounders = self.graph.confounders(treatment, outcome);
        let effect = if confounders.is_empty() { raw } else { raw * self.confounder_discount };

        CausalEffect {
            is_causal: effect >= self.spurious_threshold,
            confidence: effect.min(0.95),
            effect,
            paths,
            confounders,
            ..no_path
        }
    }

    /// Judges each signal; the outcome variable itself is never a signal.
    pub fn assess_signals(&self, signals: &BTreeMap<String, f64>) -> Vec<SignalAssessment> {
        signals
            .iter()
            .filter(|(name, _)| name.as_str() != self.outcome)
            .map(|(name, value)| {
                let effect = self.causal_effect(name);
                SignalAssessment {
                    indicator: name.clone(),
                    value: *value,
                    effect: effect.effect,
                    is_spurious: !effect.is_causal,
                }
            })
            .collect()
    }

    /// Blends the swarm's confidence with the causal support of the live
    /// signals. Below the minimum blended confidence the decision is HOLD.
    pub fn get_causal_recommendation(&self, vote: &SwarmVote, signals: &BTreeMap<String, f64>) -> CausalRecommendation {
        let assessed = self.assess_signals(signals);
        let true_signals = assessed.iter().filter(|s| !s.is_spurious).count();
        let filtered_spurious = assessed.len() - true_signals;
        let causal_sum: f64 = assessed.iter().filter(|s| !s.is_spurious).map(|s| s.effect).sum();
        let causal_confidence = (causal_sum * self.causal_scale).min(100.0);
        let swarm_confidence = vote.confidence;
        let confidence = causal_confidence * self.causal_weight + swarm_confidence * self.swarm_weight;
        let decision = if confidence < self.min_confidence {
            Vote::Hold
        } else {
            vote.final_decision
        };

        debug!(
            symbol = %vote.symbol,
            causal_confidence,
            swarm_confidence,
            confidence,
            filtered_spurious,
            "causal recommendation"
        );
        CausalRecommendation {
            decision,
            confidence,
            causal_confidence,
            swarm_confidence,
            true_signals,
            filtered_spurious,
            signals: assessed,
        }
    }

    /// Up to five variables with a causal effect on the outcome, strongest first.
    pub fn market_drivers(&self, symbol: &str) -> MarketDrivers {
        let mut drivers: Vec<MarketDriver> = self
            .graph
            .nodes()
            .filter(|n| *n != self.outcome)
            .map(|n| self.causal_effect(n))
            .filter(|e| e.is_causal)
            .map(|e| MarketDriver {
                driver: e.treatment,
                strength: e.effect,
                confidence: e.confidence,
            })
            .collect();
        drivers.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        drivers.truncate(5);
        info!(symbol, drivers = drivers.len(), "identified market drivers");
        MarketDrivers {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            drivers,
            total_analyzed: self.graph.nodes.len(),
        }
    }

    pub fn export(&self) -> GraphExport {
        let nodes = self
            .graph
            .nodes()
            .map(|n| GraphNode {
                id: n.to_string(),
                in_degree: self.graph.in_degree(n),
                out_degree: self.graph.out_degree(n),
            })
            .collect();
        let edges = self
            .graph
            .edges
            .iter()
            .flat_map(|(from, targets)| {
                targets.iter().map(move |(to, w)| GraphEdge {
                    source: from.clone(),
                    target: to.clone(),
                    weight: *w,
                    strength: if *w > 0.7 {
                        "strong"
                    } else if *w > 0.5 {
                        "medium"
                    } else {
                        "weak"
                    }
                    .to_string(),
                })
            })
            .collect();
        GraphExport {
            nodes,
            edges,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CausalFilter {
        CausalFilter::from_config(&CausalConfig::default())
    }

    #[test]
    fn indicators_downstream_of_price_have_no_effect() {
        let e = filter().causal_effect("rsi");
        assert_eq!(e.effect, 0.0);
        assert!(!e.is_causal);
    }

    #[test]
    fn two_hop_path_multiplies_weights() {
        let e = filter().causal_effect("ema_alignment");
        assert!((e.effect - 0.82 * 0.71).abs() < 1e-9);
        assert!(e.confounders.is_empty());
        assert!(e.is_causal);
    }

    #[test]
    fn confounded_volume_is_discounted_below_threshold() {
        let e = filter().causal_effect("volume_ratio");
        assert!(e.confounders.contains(&"whale_activity".to_string()));
        assert!((e.effect - 0.68 * 0.7).abs() < 1e-9);
        assert!(!e.is_causal);
    }

    #[test]
    fn whale_activity_sums_all_paths() {
        let e = filter().causal_effect("whale_activity");
        assert_eq!(e.paths.len(), 2);
        // 0.72 direct + 0.85 * 0.68 via volume, discounted for sentiment_score.
        assert!((e.effect - (0.72 + 0.85 * 0.68) * 0.7).abs() < 1e-9);
    }
}
