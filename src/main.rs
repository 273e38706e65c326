#[cfg(feature = "jemalloc")]
use tikv_jemallocator::Jemalloc;
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[cfg(feature = "jemalloc")]
fn jemalloc_purge() {
    use tikv_jemalloc_ctl::epoch;
    // Advancing the epoch lets jemalloc run its decay and return dirty pages.
    if let Ok(e) = epoch::mib() {
        let _ = e.advance();
    }
    log::debug!("jemalloc: epoch advanced");
}

use clap::Parser;
use cycle_trader::bybit_api::BybitClient;
use cycle_trader::config::Settings;
use cycle_trader::live::LiveTrader;
use cycle_trader::telegram::TelegramBot;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Live cycle trader: polls Bybit klines and trades one symbol.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML settings file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `live.symbol`.
    #[arg(short, long)]
    symbol: Option<String>,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(symbol) = args.symbol {
        settings.live.symbol = symbol;
    }
    settings.validate()?;
    let sym = settings.live.symbol.clone();

    let bybit = BybitClient::from_env()?.with_qty_decimals(settings.live.qty_decimals);
    let tg = TelegramBot::from_env();
    match &tg {
        Some(t) => t.notify_start(&sym, &settings.live.interval).await,
        None => log::info!("TELEGRAM_TOKEN/TELEGRAM_CHAT_ID not set — notifications off"),
    }

    let mut trader = LiveTrader::new(bybit, &settings)?.with_notifier(tg);
    log::info!(
        "[{}] cycle trader started — TF {} | poll {}s | lev {}x | {}% per entry",
        sym, settings.live.interval, settings.live.poll_secs, settings.bot.leverage, settings.bot.capital_percentage
    );

    // ── Main loop ─────────────────────────────────────────────────────────────
    // Ticks never overlap: the next one waits for the previous to finish.
    let mut interval = tokio::time::interval(Duration::from_secs(settings.live.poll_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                log::info!("[{}] shutdown requested", sym);
                break;
            }
        }

        match trader.tick().await {
            Ok(report) => {
                if report.new_bars > 0 || report.orders_sent > 0 {
                    log::info!(
                        "[{}] tick: {} new bars, {} orders, balance {:.2}",
                        sym,
                        report.new_bars,
                        report.orders_sent,
                        trader.simulator().state().manager().balance()
                    );
                }
            }
            Err(e) => log::error!("[{}] tick abandoned: {}", sym, e),
        }

        #[cfg(feature = "jemalloc")]
        jemalloc_purge();

        if args.once {
            break;
        }
    }
    Ok(())
}
