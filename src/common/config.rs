//! Bot configuration.
//!
//! Loaded once at startup from a TOML file, then layered with `SWARM_*`
//! environment overrides (a `.env` file is honoured). Every section has
//! defaults, so a partial file is valid. The resulting `BotConfig` is
//! shared read-only for the lifetime of the run.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::universal::regime::{Regime, RegimeProfile};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub system: SystemConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
    pub regime: RegimeConfig,
    pub futures: FuturesConfig,
    pub swarm: SwarmConfig,
    pub causal: CausalConfig,
    pub performance: PerformanceConfig,
    pub momentum: MomentumConfig,
    pub exchange: ExchangeConfig,
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    /// Per-symbol overrides, `[overrides.BTCUSDT]`.
    pub overrides: HashMap<String, SymbolOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "swarm-trader".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub candle_interval: String,
    pub check_interval_seconds: u64,
    pub kline_limit: usize,
    pub quote_asset: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            candle_interval: "15m".to_string(),
            check_interval_seconds: 60,
            kline_limit: 250,
            quote_asset: "USDT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    pub enabled: bool,
    pub activation_profit_percent: f64,
    pub trail_percent: f64,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_profit_percent: 3.0,
            trail_percent: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub position_size_percent: f64,
    pub max_positions: usize,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub trailing_stop: TrailingStopConfig,
    /// Long positions exit when RSI rises above this.
    pub rsi_overbought: f64,
    /// Short positions exit when RSI falls below this.
    pub rsi_reversal: f64,
    pub min_order_value: f64,
    /// Allowed shortfall of the exchange balance versus the recorded quantity.
    pub sync_tolerance_percent: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            position_size_percent: 10.0,
            max_positions: 3,
            stop_loss_percent: 2.0,
            take_profit_percent: 4.0,
            trailing_stop: TrailingStopConfig::default(),
            rsi_overbought: 70.0,
            rsi_reversal: 30.0,
            min_order_value: 10.0,
            sync_tolerance_percent: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub enabled: bool,
    pub bull_adx_threshold: f64,
    pub sideways_adx_threshold: f64,
    pub trend_strength_periods: usize,
    pub bull: RegimeProfile,
    pub bear: RegimeProfile,
    pub sideways: RegimeProfile,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bull_adx_threshold: 25.0,
            sideways_adx_threshold: 20.0,
            trend_strength_periods: 10,
            bull: RegimeProfile {
                stop_loss_multiplier: 1.5,
                take_profit_multiplier: 1.0,
                allow_new_trades: true,
            },
            bear: RegimeProfile {
                stop_loss_multiplier: 0.7,
                take_profit_multiplier: 0.8,
                allow_new_trades: false,
            },
            sideways: RegimeProfile::neutral(),
        }
    }
}

impl RegimeConfig {
    pub fn profile(&self, regime: Regime) -> &RegimeProfile {
        match regime {
            Regime::Bull => &self.bull,
            Regime::Bear => &self.bear,
            Regime::Sideways => &self.sideways,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturesConfig {
    pub enabled: bool,
    pub default_leverage: u32,
    pub maintenance_margin_rate: f64,
    pub liquidation_buffer_percent: f64,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_leverage: 2,
            maintenance_margin_rate: 0.004,
            liquidation_buffer_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub population: usize,
    pub initial_balance: f64,
    pub top_performers: usize,
    /// In-memory vote history cap; the store keeps everything.
    pub history_limit: usize,
    /// Decision confidence (0-100) an entry needs.
    pub min_confidence: f64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            population: 50,
            initial_balance: 1000.0,
            top_performers: 5,
            history_limit: 1000,
            min_confidence: 50.0,
        }
    }
}

/// One directed edge of the causal graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CausalEdgeConfig {
    pub from: String,
    pub to: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalConfig {
    /// Off by default: the built-in graph alone never clears the final
    /// confidence threshold, so enabling it without tuned edges blocks entries.
    pub enabled: bool,
    /// Replaces the built-in graph when non-empty.
    pub edges: Vec<CausalEdgeConfig>,
    pub outcome: String,
    pub spurious_threshold: f64,
    pub confounder_discount: f64,
    pub causal_weight: f64,
    pub swarm_weight: f64,
    /// Summed causal effect is multiplied by this to land on a 0-100 scale.
    pub causal_scale: f64,
    pub min_confidence: f64,
}

impl Default for CausalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            edges: Vec::new(),
            outcome: "price_change".to_string(),
            spurious_threshold: 0.5,
            confounder_discount: 0.7,
            causal_weight: 0.6,
            swarm_weight: 0.4,
            causal_scale: 10.0,
            min_confidence: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_signals_per_indicator: usize,
    pub min_profit_threshold: f64,
    pub outcome_horizon_secs: i64,
    /// Composite buy confidence (0..1) required for a long entry.
    pub min_buy_confidence: f64,
    pub rsi_oversold: f64,
    pub stochastic_oversold: f64,
    /// Percent above the lower Bollinger band still counted as "at the band".
    pub bb_tolerance_percent: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_signals_per_indicator: 50,
            min_profit_threshold: 1.0,
            outcome_horizon_secs: 3600,
            min_buy_confidence: 0.5,
            rsi_oversold: 30.0,
            stochastic_oversold: 20.0,
            bb_tolerance_percent: 1.0,
        }
    }
}

/// Composite momentum index. Weights are relative; a component with weight
/// zero is left out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub enabled: bool,
    pub technical_weight: f64,
    pub volume_weight: f64,
    pub relative_strength_weight: f64,
    /// Index below this is a buy zone.
    pub buy_threshold: f64,
    /// Index above this is a sell zone.
    pub sell_threshold: f64,
    /// Index below this lets a long entry past the buy-confidence gate.
    pub strong_momentum_threshold: f64,
    /// Market leader other symbols are measured against.
    pub reference_symbol: String,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            technical_weight: 40.0,
            volume_weight: 20.0,
            relative_strength_weight: 10.0,
            buy_threshold: 20.0,
            sell_threshold: 80.0,
            strong_momentum_threshold: 35.0,
            reference_symbol: "BTCUSDT".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub endpoints: Vec<String>,
    pub request_timeout_secs: u64,
    pub retry_attempts: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Quote balance the paper exchange starts with.
    pub paper_quote_balance: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://api.binance.com".to_string(),
                "https://api1.binance.com".to_string(),
            ],
            request_timeout_secs: 10,
            retry_attempts: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 2_000,
            paper_quote_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}

/// Per-symbol risk overrides.
///
/// ```toml
/// [overrides.BTCUSDT]
/// stop_loss_percent = 1.5
/// take_profit_percent = 3.0
/// leverage = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolOverride {
    pub stop_loss_percent: Option<f64>,
    pub take_profit_percent: Option<f64>,
    pub leverage: Option<u32>,
}

/// Fully-resolved risk parameters for one symbol: overrides layered on
/// top of the global defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSymbolParams {
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub leverage: u32,
}

/// Environment overrides, read with the `SWARM_` prefix.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<i64>,
    state_dir: Option<PathBuf>,
    symbols: Option<String>,
    log_level: Option<String>,
}

impl BotConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid bot configuration TOML")
    }

    /// Load `path` (if it exists), apply env overrides and validate.
    ///
    /// A missing file falls back to defaults; a malformed one is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let _ = dotenv::dotenv();

        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Self::from_toml_str(&raw)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        match envy::prefixed("SWARM_").from_env::<EnvOverrides>() {
            Ok(env) => cfg.apply_overrides(env),
            Err(err) => tracing::warn!("ignoring malformed SWARM_* environment: {err}"),
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, env: EnvOverrides) {
        if let Some(token) = env.telegram_bot_token {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = env.telegram_chat_id {
            self.telegram.chat_id = chat;
        }
        if let Some(dir) = env.state_dir {
            self.storage.state_dir = dir;
        }
        if let Some(list) = env.symbols {
            let symbols: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                self.trading.symbols = symbols;
            }
        }
        if let Some(level) = env.log_level {
            self.system.log_level = level;
        }
    }

    /// Resolve risk parameters for `symbol`. Spot mode always uses leverage 1.
    pub fn resolve_symbol_params(&self, symbol: &str) -> EffectiveSymbolParams {
        let o = self.overrides.get(symbol);
        let leverage = if self.futures.enabled {
            o.and_then(|o| o.leverage).unwrap_or(self.futures.default_leverage)
        } else {
            1
        };
        EffectiveSymbolParams {
            stop_loss_percent: o
                .and_then(|o| o.stop_loss_percent)
                .unwrap_or(self.risk.stop_loss_percent),
            take_profit_percent: o
                .and_then(|o| o.take_profit_percent)
                .unwrap_or(self.risk.take_profit_percent),
            leverage: leverage.max(1),
        }
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.trading.symbols.is_empty() {
            bail!("trading.symbols must not be empty");
        }
        if self.trading.check_interval_seconds == 0 {
            bail!("trading.check_interval_seconds must be positive");
        }
        let r = &self.risk;
        if r.max_positions == 0 {
            bail!("risk.max_positions must be at least 1");
        }
        for (name, v) in [
            ("risk.position_size_percent", r.position_size_percent),
            ("risk.stop_loss_percent", r.stop_loss_percent),
            ("risk.take_profit_percent", r.take_profit_percent),
            ("risk.trailing_stop.trail_percent", r.trailing_stop.trail_percent),
        ] {
            if !(v > 0.0) {
                bail!("{name} must be positive, got {v}");
            }
        }
        if r.position_size_percent > 100.0 {
            bail!("risk.position_size_percent cannot exceed 100");
        }
        if self.futures.default_leverage == 0 {
            bail!("futures.default_leverage must be at least 1");
        }
        if self.futures.liquidation_buffer_percent < 0.0 {
            bail!("futures.liquidation_buffer_percent must not be negative");
        }
        if self.swarm.population == 0 {
            bail!("swarm.population must be at least 1");
        }
        let m = &self.momentum;
        if m.technical_weight < 0.0 || m.volume_weight < 0.0 || m.relative_strength_weight < 0.0 {
            bail!("momentum weights must not be negative");
        }
        if m.enabled && m.technical_weight + m.volume_weight + m.relative_strength_weight <= 0.0 {
            bail!("momentum.enabled needs at least one positive weight");
        }
        if m.buy_threshold >= m.sell_threshold {
            bail!("momentum.buy_threshold must be below momentum.sell_threshold");
        }
        if self.exchange.endpoints.is_empty() {
            bail!("exchange.endpoints must not be empty");
        }
        if self.telegram.enabled && self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.enabled requires a bot token (SWARM_TELEGRAM_BOT_TOKEN)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = BotConfig::from_toml_str(
            r#"
            [trading]
            symbols = ["SOLUSDT"]

            [risk]
            stop_loss_percent = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.trading.symbols, vec!["SOLUSDT"]);
        assert_eq!(cfg.risk.stop_loss_percent, 1.5);
        assert_eq!(cfg.risk.take_profit_percent, 4.0);
        assert_eq!(cfg.swarm.population, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn symbol_override_wins_over_default() {
        let cfg = BotConfig::from_toml_str(
            r#"
            [futures]
            enabled = true
            default_leverage = 2

            [overrides.ETHUSDT]
            stop_loss_percent = 1.0
            leverage = 5
            "#,
        )
        .unwrap();
        let eth = cfg.resolve_symbol_params("ETHUSDT");
        assert_eq!(eth.stop_loss_percent, 1.0);
        assert_eq!(eth.take_profit_percent, 4.0);
        assert_eq!(eth.leverage, 5);
        assert_eq!(cfg.resolve_symbol_params("BTCUSDT").leverage, 2);
    }

    #[test]
    fn zero_max_positions_is_rejected() {
        let mut cfg = BotConfig::default();
        cfg.risk.max_positions = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn symbol_override_is_normalised() {
        let mut cfg = BotConfig::default();
        cfg.apply_overrides(EnvOverrides {
            symbols: Some(" btcusdt, ,bnbusdt ".into()),
            ..Default::default()
        });
        assert_eq!(cfg.trading.symbols, vec!["BTCUSDT", "BNBUSDT"]);
    }
}
