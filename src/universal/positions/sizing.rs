//! Order quantity from balance, risk percent and exchange lot rules.

use crate::common::exchange::SymbolFilters;

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Sized { quantity: f64, notional: f64 },
    BelowMinimum { notional: f64, minimum: f64 },
}

/// Floors `quantity` to a multiple of `step_size`. A zero step leaves it unchanged.
pub fn floor_to_step(quantity: f64, step_size: f64) -> f64 {
    if step_size <= 0.0 {
        return quantity;
    }
    // Nudge before flooring so 0.3 / 0.1 does not land on 2.999...
    let steps = (quantity / step_size + 1e-9).floor();
    let precision = decimals(step_size);
    let factor = 10f64.powi(precision as i32);
    (steps * step_size * factor).round() / factor
}

fn decimals(step: f64) -> usize {
    let s = format!("{}", step);
    s.split('.').nth(1).map(|d| d.trim_end_matches('0').len()).unwrap_or(0)
}

/// Quantity for a new entry: `quote_balance * size_percent / price`, floored
/// to the lot step, rejected below the larger of `min_order_value` and the
/// symbol's own minimum notional.
pub fn position_quantity(
    quote_balance: f64,
    size_percent: f64,
    price: f64,
    filters: &SymbolFilters,
    min_order_value: f64,
) -> SizingOutcome {
    let minimum = min_order_value.max(filters.min_notional);
    if !(price > 0.0) || !(quote_balance > 0.0) {
        return SizingOutcome::BelowMinimum { notional: 0.0, minimum };
    }
    let raw = quote_balance * size_percent / 100.0 / price;
    let quantity = floor_to_step(raw, filters.step_size);
    let notional = quantity * price;
    if quantity <= 0.0 || quantity < filters.min_qty || notional < minimum {
        return SizingOutcome::BelowMinimum { notional, minimum };
    }
    SizingOutcome::Sized { quantity, notional }
}
