use serde::{Deserialize, Serialize};
use tracing::info;

pub mod liquidation;
pub use liquidation::LiquidationGuard;

use super::positions::Side;
use super::regime::{Regime, RegimeProfile};

/// Everything the entry gates need to judge a prospective position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryContext {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub leverage: u32,
    pub regime: Regime,
    /// Final decision confidence, 0-100.
    pub decision_confidence: f64,
    /// Composite indicator buy confidence, 0-1. Only set for long entries.
    pub buy_confidence: Option<f64>,
    /// Momentum index, 0-100, when enabled.
    pub momentum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum GateDecision {
    Passed,
    Rejected { reason: String },
}

pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &EntryContext) -> GateDecision;
}

pub struct RegimeGate { pub profile: RegimeProfile }
pub struct ConfidenceGate { pub min_confidence: f64 }
/// A momentum index below `strong_momentum` overrides the minimum.
pub struct BuyConfidenceGate { pub min_buy_confidence: f64, pub strong_momentum: f64 }
/// Keeps longs out of the sell zone and shorts out of the buy zone.
pub struct MomentumGate { pub buy_threshold: f64, pub sell_threshold: f64 }

impl Gate for RegimeGate {
    fn name(&self) -> &'static str { "RegimeGate" }
    fn check(&self, ctx: &EntryContext) -> GateDecision {
        if !self.profile.allow_new_trades {
            return GateDecision::Rejected { reason: format!("new trades disabled in {} regime", ctx.regime) };
        }
        GateDecision::Passed
    }
}

impl Gate for ConfidenceGate {
    fn name(&self) -> &'static str { "ConfidenceGate" }
    fn check(&self, ctx: &EntryContext) -> GateDecision {
        if ctx.decision_confidence < self.min_confidence {
            return GateDecision::Rejected {
                reason: format!("confidence {:.1} < {:.1}", ctx.decision_confidence, self.min_confidence),
            };
        }
        GateDecision::Passed
    }
}

impl Gate for BuyConfidenceGate {
    fn name(&self) -> &'static str { "BuyConfidenceGate" }
    fn check(&self, ctx: &EntryContext) -> GateDecision {
        if let Some(m) = ctx.momentum.filter(|m| *m < self.strong_momentum) {
            info!(symbol = %ctx.symbol, momentum = m, "strong momentum overrides buy confidence");
            return GateDecision::Passed;
        }
        match ctx.buy_confidence {
            Some(c) if c < self.min_buy_confidence => GateDecision::Rejected {
                reason: format!("buy_confidence {:.2} < {:.2}", c, self.min_buy_confidence),
            },
            _ => GateDecision::Passed,
        }
    }
}

impl Gate for MomentumGate {
    fn name(&self) -> &'static str { "MomentumGate" }
    fn check(&self, ctx: &EntryContext) -> GateDecision {
        match ctx.momentum {
            Some(m) if !ctx.side.is_short() && m > self.sell_threshold => GateDecision::Rejected {
                reason: format!("momentum {m:.1} > {:.1}", self.sell_threshold),
            },
            Some(m) if ctx.side.is_short() && m < self.buy_threshold => GateDecision::Rejected {
                reason: format!("momentum {m:.1} < {:.1}", self.buy_threshold),
            },
            _ => GateDecision::Passed,
        }
    }
}

/// Runs gates in order and stops at the first rejection.
pub fn run_gates(ctx: &EntryContext, gates: &[Box<dyn Gate>]) -> (bool, Vec<(String, String)>) {
    let mut reasons = Vec::new();
    for g in gates {
        match g.check(ctx) {
            GateDecision::Passed => {}
            GateDecision::Rejected { reason } => {
                reasons.push((g.name().into(), reason));
                return (false, reasons);
            }
        }
    }
    (true, reasons)
}
