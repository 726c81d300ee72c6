use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::universal::models::Candle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

impl AssetBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Result of a market order that the exchange accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub symbol: String,
    pub side: OrderSide,
    pub status: String,
    pub executed_qty: f64,
    pub avg_price: f64,
}

impl OrderFill {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED" && self.executed_qty > 0.0
    }
}

/// Lot and notional rules of one symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub step_size: f64,
    pub min_qty: f64,
    pub min_notional: f64,
    pub tick_size: f64,
}

impl Default for SymbolFilters {
    fn default() -> Self {
        Self {
            step_size: 0.00001,
            min_qty: 0.0,
            min_notional: 10.0,
            tick_size: 0.01,
        }
    }
}

/// What the trading core needs from an exchange.
///
/// Implementations never surface transport errors to the caller: a failed
/// or rejected call is `None` (or an empty list) and the core treats it as
/// "no data this tick" or "order not filled".
#[async_trait::async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Option<f64>;

    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle>;

    /// `None` when balances could not be fetched.
    async fn get_balances(&self) -> Option<HashMap<String, AssetBalance>>;

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Option<OrderFill>;

    async fn get_symbol_filters(&self, symbol: &str) -> Option<SymbolFilters>;
}
