use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::universal::ledger::{self, LedgerEntry};
use crate::universal::regime::Regime;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
    SpotBuy,
}

impl Side {
    pub fn is_short(self) -> bool {
        matches!(self, Side::Short)
    }

    /// `+1.0` for long-biased sides, `-1.0` for short.
    pub fn direction(self) -> f64 {
        if self.is_short() {
            -1.0
        } else {
            1.0
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
            Side::SpotBuy => "SPOT-BUY",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    RsiOverbought,
    RsiReversal,
    MacdBearishCross,
    MacdBullishCross,
    ManualSellDetected,
    ManualClose,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TrailingStop => "TRAILING_STOP",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::RsiOverbought => "RSI_OVERBOUGHT",
            CloseReason::RsiReversal => "RSI_REVERSAL",
            CloseReason::MacdBearishCross => "MACD_BEARISH_CROSS",
            CloseReason::MacdBullishCross => "MACD_BULLISH_CROSS",
            CloseReason::ManualSellDetected => "MANUAL_SELL_DETECTED",
            CloseReason::ManualClose => "MANUAL_CLOSE",
        };
        f.write_str(s)
    }
}

/// Trailing-stop state of one position.
///
/// `current_stop_percent` is a signed price change from entry. For long
/// positions it starts at `-stop_loss_percent` and only moves up; for shorts
/// it starts at `+stop_loss_percent` and only moves down.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrailingStop {
    pub enabled: bool,
    pub current_stop_percent: f64,
    pub highest_price: Option<f64>,
    pub lowest_price: Option<f64>,
    pub activation_profit_percent: f64,
    pub trail_percent: f64,
}

impl TrailingStop {
    pub fn new(side: Side, entry_price: f64, stop_loss_percent: f64, enabled: bool, activation: f64, trail: f64) -> Self {
        Self {
            enabled,
            current_stop_percent: -side.direction() * stop_loss_percent,
            highest_price: (!side.is_short()).then_some(entry_price),
            lowest_price: side.is_short().then_some(entry_price),
            activation_profit_percent: activation,
            trail_percent: trail,
        }
    }
}

/// One open or closed trade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub leverage: u32,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub liquidation_price: Option<f64>,
    pub trailing_stop: TrailingStop,
    pub regime: Regime,
    pub signals: Vec<String>,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl_percent: Option<f64>,
    pub realized_pnl_usd: Option<f64>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Signed price move from entry, percent (not leveraged).
    pub fn price_change_percent(&self, price: f64) -> f64 {
        ledger::price_change_percent(self.entry_price, price)
    }

    /// Unleveraged profit percent from the position's point of view.
    pub fn profit_percent(&self, price: f64) -> f64 {
        ledger::directional_profit_percent(self.side.direction(), self.entry_price, price)
    }

    pub fn stop_loss_price(&self) -> f64 {
        self.entry_price * (1.0 - self.side.direction() * self.stop_loss_percent / 100.0)
    }

    pub fn take_profit_price(&self) -> f64 {
        self.entry_price * (1.0 + self.side.direction() * self.take_profit_percent / 100.0)
    }

    /// Capital at risk (notional divided by leverage).
    pub fn margin(&self) -> f64 {
        ledger::margin_at_risk(self.entry_price, self.quantity, self.leverage)
    }

    /// Base asset of the traded pair given its quote asset, e.g. BTC for BTCUSDT.
    pub fn base_asset(&self, quote_asset: &str) -> String {
        self.symbol
            .strip_suffix(quote_asset)
            .unwrap_or(&self.symbol)
            .to_string()
    }
}

impl LedgerEntry for Position {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn is_open(&self) -> bool {
        Position::is_open(self)
    }
}

/// Request to open a position; the manager derives stops and trailing state.
#[derive(Clone, Debug)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub regime: Regime,
    pub signals: Vec<String>,
    pub leverage: u32,
}

impl OpenRequest {
    /// Unleveraged spot buy.
    pub fn spot(symbol: &str, entry_price: f64, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::SpotBuy,
            entry_price,
            quantity,
            regime: Regime::Sideways,
            signals: Vec::new(),
            leverage: 1,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    pub fn with_leverage(mut self, leverage: u32) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_regime(mut self, regime: Regime) -> Self {
        self.regime = regime;
        self
    }

    pub fn with_signals(mut self, signals: Vec<String>) -> Self {
        self.signals = signals;
        self
    }
}

/// Result of an exit evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct ExitCheck {
    pub should_exit: bool,
    pub reason: Option<CloseReason>,
    pub profit_percent: f64,
}

impl ExitCheck {
    pub fn hold(profit_percent: f64) -> Self {
        Self { should_exit: false, reason: None, profit_percent }
    }

    pub fn exit(reason: CloseReason, profit_percent: f64) -> Self {
        Self { should_exit: true, reason: Some(reason), profit_percent }
    }
}
