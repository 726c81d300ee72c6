use super::{EntryContext, Gate, GateDecision};
use crate::universal::positions::Side;

/// Exchange maintenance margin rate used when none is configured.
pub const DEFAULT_MAINTENANCE_MARGIN_RATE: f64 = 0.004;

/// Isolated-margin liquidation price.
///
/// Long: `entry * (1 - 1/leverage + mmr)`; short: `entry * (1 + 1/leverage - mmr)`.
pub fn liquidation_price(entry_price: f64, leverage: u32, side: Side, maintenance_margin_rate: f64) -> f64 {
    let inv = 1.0 / f64::from(leverage.max(1));
    if side.is_short() {
        entry_price * (1.0 + inv - maintenance_margin_rate)
    } else {
        entry_price * (1.0 - inv + maintenance_margin_rate)
    }
}

/// Closest stop-loss price that still keeps `buffer_percent` away from liquidation.
pub fn required_stop_price(liquidation_price: f64, side: Side, buffer_percent: f64) -> f64 {
    if side.is_short() {
        liquidation_price * (1.0 - buffer_percent / 100.0)
    } else {
        liquidation_price * (1.0 + buffer_percent / 100.0)
    }
}

/// True when the stop-loss fires before the position gets near liquidation.
///
/// Long requires `stop >= liq * (1 + buffer%)`; short requires
/// `stop <= liq * (1 - buffer%)`.
pub fn validate(
    _entry_price: f64,
    stop_loss_price: f64,
    liquidation_price: f64,
    side: Side,
    buffer_percent: f64,
) -> bool {
    let required = required_stop_price(liquidation_price, side, buffer_percent);
    if side.is_short() {
        stop_loss_price <= required
    } else {
        stop_loss_price >= required
    }
}

/// Liquidation safety check for leveraged entries.
///
/// Only leveraged entries are judged; spot entries always pass.
#[derive(Debug, Clone)]
pub struct LiquidationGuard {
    pub maintenance_margin_rate: f64,
    pub buffer_percent: f64,
}

impl Default for LiquidationGuard {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: DEFAULT_MAINTENANCE_MARGIN_RATE,
            buffer_percent: 5.0,
        }
    }
}

impl LiquidationGuard {
    pub fn new(maintenance_margin_rate: f64, buffer_percent: f64) -> Self {
        Self {
            maintenance_margin_rate,
            buffer_percent,
        }
    }

    pub fn from_config(cfg: &crate::common::config::FuturesConfig) -> Self {
        Self::new(cfg.maintenance_margin_rate, cfg.liquidation_buffer_percent)
    }

    pub fn liquidation_price(&self, entry_price: f64, leverage: u32, side: Side) -> f64 {
        liquidation_price(entry_price, leverage, side, self.maintenance_margin_rate)
    }

    pub fn validate(&self, entry_price: f64, stop_loss_price: f64, liquidation_price: f64, side: Side) -> bool {
        validate(entry_price, stop_loss_price, liquidation_price, side, self.buffer_percent)
    }

    /// Liquidation price of a prospective entry, or the rejection reason
    /// when its stop-loss sits inside the buffer.
    pub fn assess(
        &self,
        entry_price: f64,
        stop_loss_price: f64,
        leverage: u32,
        side: Side,
    ) -> Result<f64, (f64, f64)> {
        let liq = self.liquidation_price(entry_price, leverage, side);
        if self.validate(entry_price, stop_loss_price, liq, side) {
            Ok(liq)
        } else {
            Err((liq, required_stop_price(liq, side, self.buffer_percent)))
        }
    }
}

impl Gate for LiquidationGuard {
    fn name(&self) -> &'static str {
        "liquidation"
    }

    fn check(&self, ctx: &EntryContext) -> GateDecision {
        if ctx.leverage <= 1 {
            return GateDecision::Passed;
        }
        match self.assess(ctx.entry_price, ctx.stop_loss_price, ctx.leverage, ctx.side) {
            Ok(_) => GateDecision::Passed,
            Err((liq, required)) => GateDecision::Rejected {
                reason: format!(
                    "stop_loss {:.4} too close to liquidation {:.4} (required {:.4})",
                    ctx.stop_loss_price, liq, required
                ),
            },
        }
    }
}
