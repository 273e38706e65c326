use crate::types::{EquityPoint, ExitReason, Trade};
use std::collections::BTreeMap;

// ── Estadísticas ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReasonStats {
    pub count: usize,
    pub pnl: f64,
}

/// Summary of a trade log. Every record counts, partial closes included;
/// wins and losses are judged on PnL net of fees.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub total_fees: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub best: f64,
    pub worst: f64,
    pub by_reason: BTreeMap<ExitReason, ReasonStats>,
}

impl Stats {
    fn empty() -> Self {
        Stats {
            trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
            total_pnl_pct: 0.0,
            total_fees: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            profit_factor: 0.0,
            max_drawdown: 0.0,
            best: 0.0,
            worst: 0.0,
            by_reason: BTreeMap::new(),
        }
    }

    pub fn verdict(&self) -> &'static str {
        if self.win_rate >= 55.0 && self.profit_factor >= 1.5 {
            "✅ VIABLE"
        } else if self.win_rate >= 50.0 {
            "⚠️  MARGINAL"
        } else {
            "❌ NOT VIABLE"
        }
    }
}

pub fn compute_stats(trades: &[Trade], initial_balance: f64) -> Stats {
    if trades.is_empty() {
        return Stats::empty();
    }
    let net: Vec<f64> = trades.iter().map(Trade::net_pnl).collect();
    let wins: Vec<f64> = net.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = net.iter().filter(|p| **p <= 0.0).map(|p| p.abs()).collect();
    let gross_win: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum();
    let total_pnl: f64 = net.iter().sum();

    let mut bal = initial_balance;
    let mut peak = initial_balance;
    let mut max_dd = 0.0_f64;
    for p in &net {
        bal += p;
        peak = peak.max(bal);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - bal) / peak * 100.0);
        }
    }

    let mut by_reason: BTreeMap<ExitReason, ReasonStats> = BTreeMap::new();
    for (t, p) in trades.iter().zip(&net) {
        let e = by_reason.entry(t.reason).or_default();
        e.count += 1;
        e.pnl += p;
    }

    Stats {
        trades: trades.len(),
        wins: wins.len(),
        losses: losses.len(),
        win_rate: wins.len() as f64 / trades.len() as f64 * 100.0,
        total_pnl,
        total_pnl_pct: if initial_balance > 0.0 { total_pnl / initial_balance * 100.0 } else { 0.0 },
        total_fees: trades.iter().map(|t| t.fees).sum(),
        avg_win: if wins.is_empty() { 0.0 } else { gross_win / wins.len() as f64 },
        avg_loss: if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 },
        profit_factor: if gross_loss == 0.0 { f64::INFINITY } else { gross_win / gross_loss },
        max_drawdown: max_dd,
        best: net.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        worst: net.iter().copied().fold(f64::INFINITY, f64::min),
        by_reason,
    }
}

/// Peak-to-trough drop of the marked-to-close equity curve, in percent.
pub fn equity_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for p in curve {
        peak = peak.max(p.equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - p.equity) / peak * 100.0);
        }
    }
    max_dd
}
