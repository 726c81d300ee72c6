use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::common::config::ExchangeConfig;
use crate::common::exchange::{AssetBalance, ExchangeClient, OrderFill, OrderSide, SymbolFilters};
use crate::universal::models::Candle;

/// Public market-data client with endpoint failover.
///
/// Each request is retried `retry_attempts` times per endpoint with
/// exponential backoff plus jitter, then the client rotates to the next
/// endpoint. Account endpoints are not implemented; pair it with
/// [`PaperExchange`](super::paper_exchange::PaperExchange) for execution.
#[derive(Clone)]
pub struct RestMarketClient {
    endpoints: Arc<Vec<String>>,
    cur_idx: Arc<Mutex<usize>>,
    client: Client,
    cfg: ExchangeConfig,
}

impl RestMarketClient {
    pub fn new(cfg: ExchangeConfig) -> Result<Self> {
        let endpoints: Vec<String> = cfg
            .endpoints
            .iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(anyhow!("no exchange endpoints configured"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()
            .context("building http client")?;
        Ok(Self {
            endpoints: Arc::new(endpoints),
            cur_idx: Arc::new(Mutex::new(0)),
            client,
            cfg,
        })
    }

    fn current_endpoint(&self) -> String {
        let idx = self.cur_idx.lock().map(|i| *i).unwrap_or(0);
        self.endpoints[idx % self.endpoints.len()].clone()
    }

    fn failover_to_next(&self) {
        if let Ok(mut idx) = self.cur_idx.lock() {
            *idx = (*idx + 1) % self.endpoints.len();
            warn!("exchange failover: switching to endpoint index {}", *idx);
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let base = self.cfg.backoff_base_ms as f64;
        let max = self.cfg.backoff_max_ms as f64;
        let delay = (base * 2f64.powi(attempt as i32)).min(max);
        let jitter = rand::thread_rng().gen_range(0.0..=delay * 0.2);
        Duration::from_millis((delay + jitter) as u64)
    }

    /// GET `path` with failover and retries; returns the decoded JSON body.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let attempts = self.cfg.retry_attempts.max(1);
        for _ in 0..self.endpoints.len() {
            let endpoint = self.current_endpoint();
            let url = format!("{endpoint}{path}");
            for attempt in 0..attempts {
                match self.client.get(&url).query(query).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        return resp.json::<Value>().await.with_context(|| format!("decoding {url}"));
                    }
                    Ok(resp) => {
                        warn!("GET {} returned non-success status: {}", url, resp.status());
                    }
                    Err(e) => {
                        warn!("GET {} failed on attempt {}: {}", url, attempt, e);
                    }
                }
                sleep(self.backoff_delay(attempt)).await;
            }
            self.failover_to_next();
        }
        Err(anyhow!("all exchange endpoints failed for {path}"))
    }

    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .get_json("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        parse_number(&body["price"]).ok_or_else(|| anyhow!("no price in ticker response"))
    }

    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let body = self
            .get_json(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        parse_klines(&body)
    }

    async fn fetch_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let body = self
            .get_json("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        parse_filters(&body, symbol)
    }
}

fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Decodes the kline array format `[open_time, open, high, low, close, volume, ...]`.
pub fn parse_klines(body: &Value) -> Result<Vec<Candle>> {
    let rows = body.as_array().ok_or_else(|| anyhow!("klines response is not an array"))?;
    rows.iter()
        .map(|row| {
            let field = |i: usize| parse_number(&row[i]).ok_or_else(|| anyhow!("bad kline field {i}"));
            Ok(Candle {
                open_time: row[0].as_i64().unwrap_or_default(),
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            })
        })
        .collect()
}

/// Extracts LOT_SIZE / MIN_NOTIONAL / PRICE_FILTER from an exchangeInfo body.
pub fn parse_filters(body: &Value, symbol: &str) -> Result<SymbolFilters> {
    let info = body["symbols"]
        .as_array()
        .and_then(|s| s.iter().find(|s| s["symbol"] == symbol))
        .ok_or_else(|| anyhow!("symbol {symbol} not in exchangeInfo"))?;
    let mut filters = SymbolFilters::default();
    for f in info["filters"].as_array().into_iter().flatten() {
        match f["filterType"].as_str() {
            Some("LOT_SIZE") => {
                filters.step_size = parse_number(&f["stepSize"]).unwrap_or(filters.step_size);
                filters.min_qty = parse_number(&f["minQty"]).unwrap_or(filters.min_qty);
            }
            Some("PRICE_FILTER") => {
                filters.tick_size = parse_number(&f["tickSize"]).unwrap_or(filters.tick_size);
            }
            Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                filters.min_notional = parse_number(&f["minNotional"]).unwrap_or(filters.min_notional);
            }
            _ => {}
        }
    }
    Ok(filters)
}

#[async_trait::async_trait]
impl ExchangeClient for RestMarketClient {
    async fn get_price(&self, symbol: &str) -> Option<f64> {
        match self.fetch_price(symbol).await {
            Ok(p) => Some(p),
            Err(err) => {
                warn!(symbol, "price unavailable: {err:#}");
                None
            }
        }
    }

    async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Candle> {
        match self.fetch_klines(symbol, interval, limit).await {
            Ok(c) => c,
            Err(err) => {
                warn!(symbol, "klines unavailable: {err:#}");
                Vec::new()
            }
        }
    }

    async fn get_balances(&self) -> Option<HashMap<String, AssetBalance>> {
        debug!("account balances are not available on the public market client");
        None
    }

    async fn place_market_order(&self, symbol: &str, side: OrderSide, _quantity: f64) -> Option<OrderFill> {
        warn!(symbol, %side, "order placement is not available on the public market client");
        None
    }

    async fn get_symbol_filters(&self, symbol: &str) -> Option<SymbolFilters> {
        match self.fetch_filters(symbol).await {
            Ok(f) => Some(f),
            Err(err) => {
                warn!(symbol, "symbol filters unavailable: {err:#}");
                None
            }
        }
    }
}
