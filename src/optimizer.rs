//! Grid search over detector/bot parameters.
//!
//! Every combination gets its own simulator; a combination that errors or
//! panics is logged and left out of the ranking.

use crate::config::{BotConfig, DetectorConfig};
use crate::simulation::{simulate, SimulationError, SimulationResult};
use crate::stats::compute_stats;
use crate::types::Candle;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

// ── Grid de búsqueda ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamGrid {
    pub min_durations: Vec<usize>,
    pub max_durations: Vec<usize>,
    pub swing_strengths: Vec<usize>,
    pub tp1_avg_percents: Vec<f64>,
    pub tp2_avg_percents: Vec<f64>,
    pub leverages: Vec<f64>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        ParamGrid {
            min_durations: vec![8, 10, 12, 15],
            max_durations: vec![20, 30, 40],
            swing_strengths: vec![1, 2],
            tp1_avg_percents: vec![50.0],
            tp2_avg_percents: vec![100.0],
            leverages: vec![10.0],
        }
    }
}

impl ParamGrid {
    /// Upper bound on combinations, before dropping `min > max` pairs.
    pub fn size(&self) -> usize {
        self.min_durations.len()
            * self.max_durations.len()
            * self.swing_strengths.len()
            * self.tp1_avg_percents.len()
            * self.tp2_avg_percents.len()
            * self.leverages.len()
    }

    /// Expands the grid over `base`, skipping duration pairs with `min > max`.
    pub fn combinations(&self, base_detector: &DetectorConfig, base_bot: &BotConfig) -> Vec<Params> {
        let mut out = Vec::with_capacity(self.size());
        for &min in &self.min_durations {
            for &max in &self.max_durations {
                if min > max {
                    continue;
                }
                for &strength in &self.swing_strengths {
                    for &tp1 in &self.tp1_avg_percents {
                        for &tp2 in &self.tp2_avg_percents {
                            for &lev in &self.leverages {
                                out.push(Params {
                                    detector: DetectorConfig {
                                        min_duration: min,
                                        max_duration: max,
                                        swing_strength: strength,
                                        ..base_detector.clone()
                                    },
                                    bot: BotConfig {
                                        tp1_avg_percent: tp1,
                                        tp2_avg_percent: tp2,
                                        leverage: lev,
                                        ..base_bot.clone()
                                    },
                                });
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub detector: DetectorConfig,
    pub bot: BotConfig,
}

impl Params {
    pub fn label(&self) -> String {
        format!(
            "min={} max={} strength={} tp1={} tp2={} lev={}",
            self.detector.min_duration,
            self.detector.max_duration,
            self.detector.swing_strength,
            self.bot.tp1_avg_percent,
            self.bot.tp2_avg_percent,
            self.bot.leverage
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizationResult {
    pub params: Params,
    /// Net of fees.
    pub pnl: f64,
    pub trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub final_balance: f64,
}

pub struct Optimizer {
    parallel: bool,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Optimizer { parallel: true }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Runs every combination and returns the viable ones ranked by PnL, best first.
    pub fn run(&self, candles: &[Candle], combos: &[Params]) -> Vec<OptimizationResult> {
        let mut results: Vec<OptimizationResult> = if self.parallel {
            combos.par_iter().filter_map(|p| evaluate(candles, p)).collect()
        } else {
            combos.iter().filter_map(|p| evaluate(candles, p)).collect()
        };
        results.sort_by(|a, b| b.pnl.total_cmp(&a.pnl));
        log::info!("{} of {} combinations viable", results.len(), combos.len());
        results
    }
}

/// Entry point for batch callers: expand `grid` over the base configs and rank.
pub fn optimize(
    candles: &[Candle],
    grid: &ParamGrid,
    base_detector: &DetectorConfig,
    base_bot: &BotConfig,
) -> Vec<OptimizationResult> {
    Optimizer::new().run(candles, &grid.combinations(base_detector, base_bot))
}

pub fn evaluate(candles: &[Candle], params: &Params) -> Option<OptimizationResult> {
    let label = params.label();
    let r = guarded(&label, || simulate(candles, &params.detector, &params.bot))?;
    let stats = compute_stats(&r.trades, params.bot.initial_balance);
    Some(OptimizationResult {
        params: params.clone(),
        pnl: r.final_balance - params.bot.initial_balance,
        trades: stats.trades,
        win_rate: stats.win_rate,
        profit_factor: stats.profit_factor,
        max_drawdown: stats.max_drawdown,
        final_balance: r.final_balance,
    })
}

/// Runs one simulation, turning both errors and panics into a logged skip.
pub fn guarded<F>(label: &str, run: F) -> Option<SimulationResult>
where
    F: FnOnce() -> Result<SimulationResult, SimulationError>,
{
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(r)) => Some(r),
        Ok(Err(e)) => {
            log::warn!("skipping {label}: {e}");
            None
        }
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::warn!("skipping {label}: panicked: {msg}");
            None
        }
    }
}
