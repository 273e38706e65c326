/// Grid search over cycle-detector and exit parameters.
/// Run: cargo run --bin optimize --release -- --data data/BTCUSDT_15.csv
use anyhow::Context;
use clap::Parser;
use cycle_trader::config::Settings;
use cycle_trader::data::load_candles;
use cycle_trader::optimizer::{OptimizationResult, Optimizer, ParamGrid};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(version, about = "Ranks parameter combinations by walk-forward PnL")]
struct Args {
    #[arg(short, long)]
    data: PathBuf,

    /// Base settings every combination starts from.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![8, 10, 12, 15])]
    min: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![20, 30, 40])]
    max: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![1, 2])]
    strength: Vec<usize>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![50.0])]
    tp1: Vec<f64>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![100.0])]
    tp2: Vec<f64>,

    #[arg(long, value_delimiter = ',', default_values_t = vec![10.0])]
    leverage: Vec<f64>,

    /// Rows printed.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Ignore combinations with fewer trade records.
    #[arg(long, default_value_t = 0)]
    min_trades: usize,

    #[arg(long, default_value = "optimized_params.csv")]
    out: PathBuf,

    /// Run combinations one at a time.
    #[arg(long)]
    sequential: bool,
}

// ── Output CSV ────────────────────────────────────────────────────────────────
fn save_results(results: &[OptimizationResult], path: &Path) -> anyhow::Result<()> {
    let mut f = std::fs::File::create(path)?;
    writeln!(f, "rank,min_duration,max_duration,swing_strength,tp1_avg_percent,tp2_avg_percent,leverage,trades,win_rate,profit_factor,max_drawdown,pnl")?;
    for (rank, r) in results.iter().enumerate() {
        let (d, b) = (&r.params.detector, &r.params.bot);
        writeln!(
            f,
            "{},{},{},{},{},{},{},{},{:.1},{:.3},{:.1},{:.2}",
            rank + 1, d.min_duration, d.max_duration, d.swing_strength, b.tp1_avg_percent,
            b.tp2_avg_percent, b.leverage, r.trades, r.win_rate, r.profit_factor, r.max_drawdown, r.pnl
        )?;
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let candles = load_candles(&args.data).with_context(|| format!("loading {}", args.data.display()))?;

    let grid = ParamGrid {
        min_durations: args.min.clone(),
        max_durations: args.max.clone(),
        swing_strengths: args.strength.clone(),
        tp1_avg_percents: args.tp1.clone(),
        tp2_avg_percents: args.tp2.clone(),
        leverages: args.leverage.clone(),
    };
    let combos = grid.combinations(&base.detector, &base.bot);

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║           CYCLE OPTIMIZER — walk-forward grid search         ║");
    println!("║  {:>5} combinations × {:>7} bars                            ║", combos.len(), candles.len());
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let started = Instant::now();
    let results: Vec<OptimizationResult> = Optimizer::new()
        .with_parallelism(!args.sequential)
        .run(&candles, &combos)
        .into_iter()
        .filter(|r| r.trades >= args.min_trades)
        .collect();
    println!(
        "    {} viable of {} in {:.1}s\n",
        results.len(),
        combos.len(),
        started.elapsed().as_secs_f64()
    );

    if results.is_empty() {
        println!("    No viable combinations.");
        return Ok(());
    }

    println!(
        "    {:>4}  {:>4}  {:>4}  {:>3}  {:>5}  {:>5}  {:>5}  {:>6}  {:>6}  {:>6}  {:>6}  {:>10}",
        "Rank", "Min", "Max", "Str", "TP1%", "TP2%", "Lev", "Trades", "WR%", "PF", "DD%", "PnL"
    );
    println!("    {}", "─".repeat(84));
    for (rank, r) in results.iter().take(args.top).enumerate() {
        let (d, b) = (&r.params.detector, &r.params.bot);
        println!(
            "    {:>4}  {:>4}  {:>4}  {:>3}  {:>5.0}  {:>5.0}  {:>5.1}  {:>6}  {:>5.1}%  {:>6.2}  {:>5.1}%  {:>+10.2}",
            rank + 1, d.min_duration, d.max_duration, d.swing_strength, b.tp1_avg_percent,
            b.tp2_avg_percent, b.leverage, r.trades, r.win_rate, r.profit_factor, r.max_drawdown, r.pnl
        );
    }

    if let Some(best) = results.first() {
        println!();
        println!("    ✅ BEST: {}  PnL={:+.2}", best.params.label(), best.pnl);
    }

    save_results(&results, &args.out)?;
    println!("\n  📄 Results saved: {}\n", args.out.display());
    Ok(())
}
