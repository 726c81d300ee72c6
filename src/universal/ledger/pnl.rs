//! P/L arithmetic shared by real and simulated trades.
//!
//! USD results are always derived from the margin put at risk
//! (`entry * quantity / leverage`) scaled by the leveraged percent move.
//! For an unleveraged trade the margin is the notional, so both views agree.

/// Signed price move from `entry` to `price`, in percent.
pub fn price_change_percent(entry: f64, price: f64) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    (price - entry) / entry * 100.0
}

/// Profit percent for a position whose direction is `+1.0` (long) or `-1.0` (short).
pub fn directional_profit_percent(direction: f64, entry: f64, price: f64) -> f64 {
    direction * price_change_percent(entry, price)
}

/// Capital committed to a trade of `quantity` at `entry` with `leverage`.
pub fn margin_at_risk(entry: f64, quantity: f64, leverage: u32) -> f64 {
    entry * quantity / f64::from(leverage.max(1))
}

/// Realized USD P/L given the leveraged percent result.
pub fn pnl_usd(entry: f64, quantity: f64, leverage: u32, leveraged_percent: f64) -> f64 {
    margin_at_risk(entry, quantity, leverage) * leveraged_percent / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_pnl_matches_notional_move() {
        // 10x long, +1% move => +10% on margin, 1_000 notional => +10 USD.
        let pct = directional_profit_percent(1.0, 100.0, 101.0) * 10.0;
        let usd = pnl_usd(100.0, 10.0, 10, pct);
        assert!((pct - 10.0).abs() < 1e-9);
        assert!((usd - 10.0).abs() < 1e-9);
    }

    #[test]
    fn zero_entry_is_flat() {
        assert_eq!(price_change_percent(0.0, 10.0), 0.0);
    }
}
