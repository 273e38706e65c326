/// Walk-forward backtest over a candle CSV.
/// Run: cargo run --bin backtest --release -- --data data/BTCUSDT_15.csv
use anyhow::Context;
use clap::Parser;
use cycle_trader::config::Settings;
use cycle_trader::data::{load_candles, ms_to_date, save_equity, save_trades};
use cycle_trader::simulation::{simulate, SimulationResult};
use cycle_trader::stats::{compute_stats, equity_drawdown, Stats};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Replays a candle CSV bar by bar and reports the trade log")]
struct Args {
    /// Candle CSV with time/open/high/low/close[/volume] headers.
    #[arg(short, long)]
    data: PathBuf,

    /// TOML settings file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trade log output.
    #[arg(long, default_value = "backtest_trades.csv")]
    trades_out: PathBuf,

    /// Optional equity curve output.
    #[arg(long)]
    equity_out: Option<PathBuf>,
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_stats(label: &str, s: &Stats, r: &SimulationResult) {
    println!();
    println!("  ┌─────────────────────────────────────────────┐");
    println!("  │  {:24}  {}", label, s.verdict());
    println!("  ├─────────────────────────────────────────────┤");
    println!("  │  Trades         {:>6}   ({} W / {} L)", s.trades, s.wins, s.losses);
    println!("  │  Win Rate       {:>6.1}%", s.win_rate);
    println!("  │  Total PnL      {:>+9.2} USDT  ({:+.1}%)", s.total_pnl, s.total_pnl_pct);
    println!("  │  Fees           {:>9.2} USDT", s.total_fees);
    println!("  │  Avg Win        {:>+9.2} USDT", s.avg_win);
    println!("  │  Avg Loss       {:>+9.2} USDT", -s.avg_loss);
    println!("  │  Profit Factor  {:>9.2}", s.profit_factor);
    println!("  │  Max Drawdown   {:>6.1}%  (equity {:.1}%)", s.max_drawdown, equity_drawdown(&r.equity_curve));
    println!("  │  Best Trade     {:>+9.2} USDT", s.best);
    println!("  │  Worst Trade    {:>+9.2} USDT", s.worst);
    println!("  │  Final Balance  {:>9.2} USDT", r.final_balance);
    println!("  └─────────────────────────────────────────────┘");

    if !s.by_reason.is_empty() {
        println!();
        println!("  Exits by reason:");
        for (reason, rs) in &s.by_reason {
            let pct = rs.count as f64 / s.trades as f64 * 100.0;
            println!("    {:<18}  {:>5} trades ({:>4.1}%)   {:>+9.2} USDT", reason.as_str(), rs.count, pct, rs.pnl);
        }
    }

    if let Some(p) = &r.open_position {
        println!();
        println!(
            "  Still open: {} @ {:.4} since bar {} — sl {:.4}, size {:.6}",
            p.side, p.entry_price, p.entry_index, p.sl_price, p.position_size
        );
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let candles = load_candles(&args.data).with_context(|| format!("loading {}", args.data.display()))?;

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║             CYCLE BACKTESTER — walk-forward           ║");
    println!(
        "║  Capital: ${:<8.0} Lev: {:>4}x   Per entry: {:>5.1}%   ║",
        settings.bot.initial_balance, settings.bot.leverage, settings.bot.capital_percentage
    );
    println!("╚═══════════════════════════════════════════════════════╝");
    if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
        println!(
            "  {} bars  {} → {}",
            candles.len(),
            ms_to_date(first.time),
            ms_to_date(last.time)
        );
    }

    let result = simulate(&candles, &settings.detector, &settings.bot)?;
    let stats = compute_stats(&result.trades, settings.bot.initial_balance);
    let label = args
        .data
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "candles".to_string());
    print_stats(&label, &stats, &result);

    save_trades(&args.trades_out, &result.trades)?;
    println!("\n  📄 Trade log: {}", args.trades_out.display());
    if let Some(path) = &args.equity_out {
        save_equity(path, &result.equity_curve)?;
        println!("  📄 Equity curve: {}", path.display());
    }
    println!();
    Ok(())
}
