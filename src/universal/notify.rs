use std::sync::Mutex;

use tracing::info;

use super::positions::Position;

/// Fire-and-forget sink for trade events.
///
/// Implementations must not block the caller; delivery failures are logged
/// by the implementation and never reported back.
pub trait Notifier: Send + Sync {
    fn notify_open(&self, position: &Position);
    fn notify_close(&self, position: &Position);
    fn notify_text(&self, text: &str);
}

pub fn format_open(p: &Position) -> String {
    let mut msg = format!(
        "🟢 <b>OPEN {}</b> {}\nEntry: {:.6}\nQty: {:.6}\nSL: {:.2}% ({:.6})\nTP: {:.2}% ({:.6})\nRegime: {}",
        p.side,
        p.symbol,
        p.entry_price,
        p.quantity,
        p.stop_loss_percent,
        p.stop_loss_price(),
        p.take_profit_percent,
        p.take_profit_price(),
        p.regime,
    );
    if p.leverage > 1 {
        msg.push_str(&format!("\nLeverage: {}x", p.leverage));
        if let Some(liq) = p.liquidation_price {
            msg.push_str(&format!("\nLiquidation: {:.6}", liq));
        }
    }
    msg
}

pub fn format_close(p: &Position) -> String {
    let pct = p.realized_pnl_percent.unwrap_or_default();
    let icon = if pct >= 0.0 { "✅" } else { "🔴" };
    format!(
        "{} <b>CLOSE {}</b> {}\nReason: {}\nEntry: {:.6}\nExit: {:.6}\nP/L: {:+.2}% ({:+.2} USD)",
        icon,
        p.side,
        p.symbol,
        p.close_reason.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
        p.entry_price,
        p.exit_price.unwrap_or_default(),
        pct,
        p.realized_pnl_usd.unwrap_or_default(),
    )
}

/// Writes events to the log only.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_open(&self, position: &Position) {
        info!(symbol = %position.symbol, "notify open");
    }

    fn notify_close(&self, position: &Position) {
        info!(symbol = %position.symbol, reason = ?position.close_reason, "notify close");
    }

    fn notify_text(&self, text: &str) {
        info!("notify: {text}");
    }
}

/// Keeps every message in memory; used by tests and dry runs.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn push(&self, msg: String) {
        if let Ok(mut m) = self.messages.lock() {
            m.push(msg);
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify_open(&self, position: &Position) {
        self.push(format_open(position));
    }

    fn notify_close(&self, position: &Position) {
        self.push(format_close(position));
    }

    fn notify_text(&self, text: &str) {
        self.push(text.to_string());
    }
}

#[cfg(feature = "telegram_control")]
pub use telegram_sink::TelegramNotifier;

#[cfg(feature = "telegram_control")]
mod telegram_sink {
    use teloxide::prelude::*;
    use teloxide::types::ParseMode;
    use tokio::sync::mpsc;
    use tracing::warn;

    use super::*;

    /// Sends HTML messages to one chat from a background dispatcher task.
    pub struct TelegramNotifier {
        tx: mpsc::UnboundedSender<String>,
    }

    impl TelegramNotifier {
        /// Spawns the dispatcher; must be called inside a tokio runtime.
        pub fn spawn(bot: Bot, chat_id: i64) -> Self {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                while let Some(text) = rx.recv().await {
                    if let Err(err) = bot
                        .send_message(ChatId(chat_id), text)
                        .parse_mode(ParseMode::Html)
                        .await
                    {
                        warn!("telegram send failed: {err}");
                    }
                }
            });
            Self { tx }
        }

        fn send(&self, text: String) {
            if self.tx.send(text).is_err() {
                warn!("telegram dispatcher stopped, dropping message");
            }
        }
    }

    impl Notifier for TelegramNotifier {
        fn notify_open(&self, position: &Position) {
            self.send(format_open(position));
        }

        fn notify_close(&self, position: &Position) {
            self.send(format_close(position));
        }

        fn notify_text(&self, text: &str) {
            self.send(text.to_string());
        }
    }
}
