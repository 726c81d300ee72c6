//! Chat control surface.
//!
//! Read commands are answered straight from the shared accessors. Commands
//! that change state (`/pause`, `/resume`, `/close`) are queued to the main
//! loop, which is the only place positions are mutated.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::engine::StatusBoard;
use super::positions::{Position, PositionManager, TradeStats};
use super::regime::RegimeReading;
use super::swarm::{SwarmCoordinator, SwarmStats};

#[derive(Clone, Debug, PartialEq)]
pub enum Ctrl {
    Status,
    Positions,
    Stats,
    Swarm,
    Regime(String),
    Pause,
    Resume,
    Close(String),
    Help,
}

impl Ctrl {
    /// True for commands the main loop has to apply.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Ctrl::Pause | Ctrl::Resume | Ctrl::Close(_))
    }
}

pub const HELP: &str = "<b>Commands</b>
/status - loop state and open positions
/positions - open positions with unrealized P/L
/stats - closed trade statistics
/swarm - swarm performance summary
/regime SYMBOL - latest market regime
/pause - stop opening new positions
/resume - allow new positions again
/close SYMBOL - close a position at market
/help - this message";

/// Parse slash commands. `/cmd@botname` is accepted as `/cmd`.
pub fn parse_command(text: &str) -> Option<Ctrl> {
    let parts: Vec<&str> = text.trim().split_whitespace().collect();
    let head = parts.first().copied().unwrap_or("");
    let cmd = head.split('@').next().unwrap_or("").to_ascii_lowercase();
    let arg = || parts.get(1).map(|s| s.to_ascii_uppercase());
    match cmd.as_str() {
        "/status" | "/start" => Some(Ctrl::Status),
        "/positions" => Some(Ctrl::Positions),
        "/stats" => Some(Ctrl::Stats),
        "/swarm" => Some(Ctrl::Swarm),
        "/regime" => arg().map(Ctrl::Regime),
        "/pause" => Some(Ctrl::Pause),
        "/resume" => Some(Ctrl::Resume),
        "/close" => arg().map(Ctrl::Close),
        "/help" => Some(Ctrl::Help),
        _ => None,
    }
}

/// Read-only handles the chat listener answers from.
#[derive(Clone)]
pub struct ControlView {
    pub positions: Arc<PositionManager>,
    pub swarm: Arc<Mutex<SwarmCoordinator>>,
    pub status: Arc<StatusBoard>,
}

/// Builds the reply for `cmd`, queueing mutations on `control`.
pub fn respond(cmd: &Ctrl, view: &ControlView, control: &mpsc::UnboundedSender<Ctrl>) -> String {
    if cmd.is_mutation() {
        if control.send(cmd.clone()).is_err() {
            return "Trading loop is not running.".into();
        }
        return match cmd {
            Ctrl::Pause => "⏸ Pausing new entries.".into(),
            Ctrl::Resume => "▶️ Resuming new entries.".into(),
            Ctrl::Close(symbol) => format!("Closing {symbol} at market on the next tick."),
            _ => String::new(),
        };
    }
    match cmd {
        Ctrl::Status => render_status(view),
        Ctrl::Positions => render_positions(&view.positions.open_positions(), |s| view.status.last_price(s)),
        Ctrl::Stats => render_stats(&view.positions.stats()),
        Ctrl::Swarm => match view.swarm.lock() {
            Ok(swarm) => render_swarm(&swarm.stats()),
            Err(_) => "Swarm state unavailable.".into(),
        },
        Ctrl::Regime(symbol) => render_regime(symbol, view.status.regime(symbol).as_ref()),
        _ => HELP.into(),
    }
}

pub fn render_status(view: &ControlView) -> String {
    let state = if view.status.is_paused() { "⏸ paused" } else { "▶️ running" };
    let last = view
        .status
        .last_tick()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".into());
    let stats = view.positions.stats();
    format!(
        "<b>Status</b>: {state}\nIterations: {}\nLast tick: {last}\nOpen positions: {}/{}\nClosed trades: {}\nRealized P/L: {:+.2} USD",
        view.status.iterations(),
        view.positions.open_count(),
        view.positions.settings().max_positions,
        stats.total_trades,
        stats.total_pnl_usd,
    )
}

pub fn render_positions(positions: &[Position], last_price: impl Fn(&str) -> Option<f64>) -> String {
    if positions.is_empty() {
        return "No open positions.".into();
    }
    let mut out = String::from("<b>Open positions</b>");
    for p in positions {
        let _ = write!(out, "\n\n<b>{}</b> {} @ {:.6} x {:.6}", p.symbol, p.side, p.entry_price, p.quantity);
        if p.leverage > 1 {
            let _ = write!(out, " ({}x)", p.leverage);
        }
        if let Some(price) = last_price(&p.symbol) {
            let pct = p.profit_percent(price) * f64::from(p.leverage.max(1));
            let _ = write!(out, "\nNow {:.6} ({:+.2}%)", price, pct);
        }
        let _ = write!(
            out,
            "\nSL {:.6} | TP {:.6} | trail {:+.2}%",
            p.stop_loss_price(),
            p.take_profit_price(),
            p.trailing_stop.current_stop_percent
        );
    }
    out
}

pub fn render_stats(stats: &TradeStats) -> String {
    if stats.total_trades == 0 {
        return "No closed trades yet.".into();
    }
    let mut out = format!(
        "<b>Trade stats</b>\nTrades: {} ({} won, {} lost)\nWin rate: {:.1}%\nP/L: {:+.2} USD ({:+.2}%)\nBest: {:+.2}% | Worst: {:+.2}%",
        stats.total_trades,
        stats.winning_trades,
        stats.losing_trades,
        stats.win_rate(),
        stats.total_pnl_usd,
        stats.total_pnl_percent,
        stats.best_trade_percent.unwrap_or_default(),
        stats.worst_trade_percent.unwrap_or_default(),
    );
    for (symbol, s) in &stats.by_symbol {
        let _ = write!(out, "\n{symbol}: {} trades, {:+.2} USD", s.trades, s.pnl_usd);
    }
    out
}

pub fn render_swarm(stats: &SwarmStats) -> String {
    let mut out = format!(
        "<b>Swarm</b>: {} agents\nTotal paper P/L: {:+.2}\nAvg balance: {:.2}\nProfitable: {} ({:.1}%)",
        stats.total_agents, stats.total_profit, stats.avg_balance, stats.profitable_agents, stats.profitability_rate,
    );
    if let Some(best) = &stats.best {
        let _ = write!(out, "\nBest: #{} {} ROI {:+.2}%", best.id, best.strategy.name(), best.roi);
    }
    if let Some(worst) = &stats.worst {
        let _ = write!(out, "\nWorst: #{} {} ROI {:+.2}%", worst.id, worst.strategy.name(), worst.roi);
    }
    for a in stats.top_10.iter().take(5) {
        let _ = write!(out, "\n#{} 24h {:+.2} weight {:.2}", a.id, a.last_24h_profit, a.vote_weight);
    }
    out
}

pub fn render_regime(symbol: &str, reading: Option<&RegimeReading>) -> String {
    match reading {
        Some(r) => format!("<b>{symbol}</b> regime: {}\n{}", r.regime, r.rationale),
        None => format!("No regime reading for {symbol} yet."),
    }
}

#[cfg(feature = "telegram_control")]
pub use listener::run_listener;

#[cfg(feature = "telegram_control")]
mod listener {
    use teloxide::prelude::*;
    use teloxide::types::ParseMode;
    use tracing::{debug, info};

    use super::*;

    /// Answers commands from `chat_id`; messages from other chats are ignored.
    pub async fn run_listener(bot: Bot, chat_id: i64, view: ControlView, control: mpsc::UnboundedSender<Ctrl>) {
        info!(chat_id, "telegram command listener started");
        teloxide::repl(bot, move |bot: Bot, msg: Message| {
            let view = view.clone();
            let control = control.clone();
            async move {
                if msg.chat.id.0 != chat_id {
                    debug!(chat = msg.chat.id.0, "ignoring message from unknown chat");
                    return Ok(());
                }
                let Some(text) = msg.text() else {
                    return Ok(());
                };
                let reply = match parse_command(text) {
                    Some(cmd) => super::respond(&cmd, &view, &control),
                    None => "Unknown command. Try /help".to_string(),
                };
                bot.send_message(msg.chat.id, reply).parse_mode(ParseMode::Html).await?;
                Ok(())
            }
        })
        .await;
    }
}
