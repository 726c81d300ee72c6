use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use swarm_trader::common::config::BotConfig;
use swarm_trader::common::exchange::ExchangeClient;
use swarm_trader::common::logger;
use swarm_trader::common::paper_exchange::PaperExchange;
use swarm_trader::common::rest_client::RestMarketClient;
use swarm_trader::universal::engine::{IterationReport, SymbolOutcome, TradingContext, TradingEngine};
use swarm_trader::universal::notify::{LogNotifier, Notifier};
use swarm_trader::universal::positions::Side;
use swarm_trader::universal::store::{JsonFileStore, MemoryStore, StateStore};

#[derive(Parser, Debug)]
#[command(name = "swarm-trader")]
#[command(about = "Swarm-voting crypto trading bot with paper execution")]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Run a single iteration and exit
    #[arg(long)]
    once: bool,
    /// Log level, overrides `system.log_level`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = BotConfig::load(&args.config)?;
    logger::init(args.log_level.as_deref().unwrap_or(&config.system.log_level));
    let config = Arc::new(config);

    info!(
        name = %config.system.name,
        symbols = ?config.trading.symbols,
        futures = config.futures.enabled,
        causal = config.causal.enabled,
        "starting"
    );

    let store: Arc<dyn StateStore> = match JsonFileStore::open(&config.storage.state_dir) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!("state dir unavailable, running memory-only: {err:#}");
            Arc::new(MemoryStore::new())
        }
    };

    let market = RestMarketClient::new(config.exchange.clone()).context("building market data client")?;
    let paper = Arc::new(PaperExchange::new(
        Arc::new(market),
        &config.trading.quote_asset,
        config.exchange.paper_quote_balance,
    ));

    #[cfg(feature = "telegram_control")]
    let bot = config
        .telegram
        .enabled
        .then(|| teloxide::Bot::new(config.telegram.bot_token.clone()));
    #[cfg(not(feature = "telegram_control"))]
    if config.telegram.enabled {
        warn!("telegram enabled in config but built without the telegram_control feature");
    }

    #[cfg(feature = "telegram_control")]
    let notifier: Arc<dyn Notifier> = match &bot {
        Some(bot) => Arc::new(swarm_trader::universal::notify::TelegramNotifier::spawn(
            bot.clone(),
            config.telegram.chat_id,
        )),
        None => Arc::new(LogNotifier),
    };
    #[cfg(not(feature = "telegram_control"))]
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let exchange: Arc<dyn ExchangeClient> = paper.clone();
    let ctx = TradingContext::new(config.clone(), exchange, store, notifier.clone());
    ctx.restore().context("restoring persisted state")?;

    // Paper balances are not persisted; re-seed the base assets of restored
    // spot positions so reconciliation does not treat them as sold.
    for pos in ctx.positions.open_positions() {
        if pos.side == Side::SpotBuy {
            let asset = pos.base_asset(&config.trading.quote_asset);
            paper.set_balance(&asset, paper.balance(&asset) + pos.quantity);
        }
    }

    let (mut engine, control) = TradingEngine::new(ctx);

    #[cfg(feature = "telegram_control")]
    if let Some(bot) = bot {
        let view = engine.context().control_view();
        tokio::spawn(swarm_trader::universal::telegram::run_listener(
            bot,
            config.telegram.chat_id,
            view,
            control.clone(),
        ));
    }
    #[cfg(not(feature = "telegram_control"))]
    let _ = &control;

    notifier.notify_text(&format!("🤖 {} started", config.system.name));

    let mut ticker = tokio::time::interval(Duration::from_secs(config.trading.check_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = engine.run_iteration().await;
                print_status(&engine, &report, paper.balance(&config.trading.quote_asset));
                if args.once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    notifier.notify_text(&format!("🛑 {} stopped", config.system.name));
    // Give the notification dispatcher a moment to flush.
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

fn print_status(engine: &TradingEngine, report: &IterationReport, quote_balance: f64) {
    let ctx = engine.context();
    let quote = &ctx.config.trading.quote_asset;
    println!(
        "\n{} iteration {} | {} {:.2} | open {}/{}",
        "▶".cyan(),
        ctx.status.iterations(),
        quote,
        quote_balance,
        ctx.positions.open_count(),
        ctx.positions.settings().max_positions
    );

    for (symbol, outcome) in &report.symbols {
        let line = match outcome {
            SymbolOutcome::NoData => "no data".dimmed().to_string(),
            SymbolOutcome::Held => "hold".normal().to_string(),
            SymbolOutcome::Entered(side) => format!("entered {side}").green().bold().to_string(),
            SymbolOutcome::Exited(reason) => format!("exited {reason}").yellow().bold().to_string(),
            SymbolOutcome::Skipped(why) => format!("skipped: {why}").dimmed().to_string(),
        };
        println!("  {:<12} {}", symbol, line);
    }

    for pos in ctx.positions.open_positions() {
        let Some(price) = ctx.status.last_price(&pos.symbol) else {
            continue;
        };
        let pct = pos.profit_percent(price) * f64::from(pos.leverage.max(1));
        let pnl = format!("{pct:+.2}%");
        let pnl = if pct >= 0.0 { pnl.green() } else { pnl.red() };
        println!(
            "  {:<12} {:<8} entry {:.6} now {:.6} {} stop {:+.2}%",
            pos.symbol,
            pos.side.to_string(),
            pos.entry_price,
            price,
            pnl,
            pos.trailing_stop.current_stop_percent
        );
    }

    for pos in &report.reconciled {
        println!("  {:<12} {}", pos.symbol, "closed: manual sell detected".red());
    }

    let stats = ctx.positions.stats();
    if stats.total_trades > 0 {
        let total = format!("{:+.2} {}", stats.total_pnl_usd, quote);
        let total = if stats.total_pnl_usd >= 0.0 { total.green() } else { total.red() };
        println!(
            "  trades {} | win rate {:.1}% | P/L {}",
            stats.total_trades,
            stats.win_rate(),
            total
        );
    }
}
