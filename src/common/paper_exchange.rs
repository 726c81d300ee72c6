use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::common::exchange::{AssetBalance, ExchangeClient, OrderFill, OrderSide, SymbolFilters};
use crate::universal::models::Candle;

/// Simulated spot account on top of a real market-data source.
///
/// Market orders fill immediately at the current market price. Buys need
/// enough free quote balance, sells enough free base balance; anything else
/// is an unfilled order.
pub struct PaperExchange {
    market: Arc<dyn ExchangeClient>,
    quote_asset: String,
    balances: Mutex<HashMap<String, f64>>,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn ExchangeClient>, quote_asset: &str, quote_balance: f64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(quote_asset.to_string(), quote_balance);
        Self {
            market,
            quote_asset: quote_asset.to_string(),
            balances: Mutex::new(balances),
        }
    }

    /// Overwrites one asset balance. Used when resuming with persisted positions.
    pub fn set_balance(&self, asset: &str, amount: f64) {
        if let Ok(mut b) = self.balances.lock() {
            b.insert(asset.to_string(), amount);
        }
    }

    pub fn balance(&self, asset: &str) -> f64 {
        self.balances
            .lock()
            .ok()
            .and_then(|b| b.get(asset).copied())
            .unwrap_or(0.0)
    }

    fn base_asset<'a>(&self, symbol: &'a str) -> &'a str {
        symbol.strip_suffix(self.quote_asset.as_str()).unwrap_or(symbol)
    }
}

#[async_trait::async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_price(&self, symbol: &str) -> Option<f64> {
        self.market.get_price(symbol).await
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle> {
        self.market.get_klines(symbol, interval, limit).await
    }

    async fn get_balances(&self) -> Option<HashMap<String, AssetBalance>> {
        let b = self.balances.lock().ok()?;
        Some(
            b.iter()
                .map(|(asset, free)| {
                    (
                        asset.clone(),
                        AssetBalance {
                            asset: asset.clone(),
                            free: *free,
                            locked: 0.0,
                        },
                    )
                })
                .collect(),
        )
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: f64) -> Option<OrderFill> {
        if !(quantity > 0.0) {
            return None;
        }
        let price = self.market.get_price(symbol).await?;
        let base = self.base_asset(symbol).to_string();
        let cost = price * quantity;

        let mut b = self.balances.lock().ok()?;
        match side {
            OrderSide::Buy => {
                let quote = b.get(&self.quote_asset).copied().unwrap_or(0.0);
                if quote < cost {
                    warn!(symbol, cost, quote, "paper buy rejected: insufficient quote balance");
                    return None;
                }
                b.insert(self.quote_asset.clone(), quote - cost);
                *b.entry(base).or_insert(0.0) += quantity;
            }
            OrderSide::Sell => {
                let held = b.get(&base).copied().unwrap_or(0.0);
                if held + 1e-12 < quantity {
                    warn!(symbol, quantity, held, "paper sell rejected: insufficient base balance");
                    return None;
                }
                b.insert(base, (held - quantity).max(0.0));
                *b.entry(self.quote_asset.clone()).or_insert(0.0) += cost;
            }
        }
        info!(symbol, %side, quantity, price, "paper order filled");
        Some(OrderFill {
            symbol: symbol.to_string(),
            side,
            status: "FILLED".to_string(),
            executed_qty: quantity,
            avg_price: price,
        })
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Option<SymbolFilters> {
        match self.market.get_symbol_filters(symbol).await {
            Some(f) => Some(f),
            None => Some(SymbolFilters::default()),
        }
    }
}
