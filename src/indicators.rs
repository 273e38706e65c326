//! Per-bar indicator series.
//!
//! Every function returns a vector aligned 1:1 with its input. Leading bars
//! without enough history are back-filled with the first stable value, and an
//! input shorter than the period yields a neutral series instead of an error.

use crate::types::Candle;

const NEUTRAL_OSCILLATOR: f64 = 50.0;

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

fn back_fill(series: &mut [f64], first_stable: usize) {
    if first_stable >= series.len() {
        return;
    }
    let v = series[first_stable];
    for x in &mut series[..first_stable] {
        *x = v;
    }
}

/// Wilder RSI. Flat input (no gains, no losses) reads 50.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    if period == 0 || n < period + 1 {
        return vec![NEUTRAL_OSCILLATOR; n];
    }

    let mut out = vec![NEUTRAL_OSCILLATOR; n];
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = closes[i] - closes[i - 1];
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let ch = closes[i] - closes[i - 1];
        let gain = ch.max(0.0);
        let loss = (-ch).max(0.0);
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
        out[i] = rsi_value(avg_gain, avg_loss);
    }

    back_fill(&mut out, period);
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            NEUTRAL_OSCILLATOR
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stochastic {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

/// Stochastic %K over `k_period` bars and its `d_period` SMA (%D).
/// A window with zero range reads 50.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    d_period: usize,
) -> Stochastic {
    let n = closes.len().min(highs.len()).min(lows.len());
    if k_period == 0 || n < k_period {
        return Stochastic {
            k: vec![NEUTRAL_OSCILLATOR; n],
            d: vec![NEUTRAL_OSCILLATOR; n],
        };
    }

    let mut k = vec![NEUTRAL_OSCILLATOR; n];
    for i in (k_period - 1)..n {
        let window = (i + 1 - k_period)..=i;
        let hh = highs[window.clone()].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let ll = lows[window].iter().cloned().fold(f64::INFINITY, f64::min);
        let range = hh - ll;
        k[i] = if range > 0.0 {
            100.0 * (closes[i] - ll) / range
        } else {
            NEUTRAL_OSCILLATOR
        };
    }
    back_fill(&mut k, k_period - 1);
    let d = sma(&k, d_period);
    Stochastic { k, d }
}

/// Wilder ATR. Needs `period + 1` bars; shorter input reads 0.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len().min(highs.len()).min(lows.len());
    if period == 0 || n < period + 1 {
        return vec![0.0; n];
    }

    let mut tr = vec![0.0; n];
    tr[0] = highs[0] - lows[0];
    for i in 1..n {
        let pc = closes[i - 1];
        tr[i] = (highs[i] - lows[i])
            .max((highs[i] - pc).abs())
            .max((lows[i] - pc).abs());
    }

    let mut out = vec![0.0; n];
    let mut value = tr[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = value;
    for i in (period + 1)..n {
        value = (value * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = value;
    }
    back_fill(&mut out, period);
    out
}

pub fn candle_atr(candles: &[Candle], period: usize) -> Vec<f64> {
    atr(&highs(candles), &lows(candles), &closes(candles), period)
}

/// Simple moving average. Shorter input reads the mean of what is available.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    if period == 0 || n < period {
        let mean = values.iter().sum::<f64>() / n as f64;
        return vec![mean; n];
    }

    let mut out = vec![0.0; n];
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..n {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    back_fill(&mut out, period - 1);
    out
}

/// Exponential moving average seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };
    let alpha = 2.0 / (period.max(1) as f64 + 1.0);
    let mut value = first;
    for &v in values {
        value = alpha * v + (1.0 - alpha) * value;
        out.push(value);
    }
    out
}

/// Rate of change in price units: `x[i] − x[i − period]`.
pub fn momentum(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    if period == 0 || n <= period {
        return vec![0.0; n];
    }
    let mut out = vec![0.0; n];
    for i in period..n {
        out[i] = values[i] - values[i - period];
    }
    back_fill(&mut out, period);
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// Dual-EMA trend classification on the last bar.
pub fn trend(closes: &[f64], fast: usize, slow: usize) -> Trend {
    let (Some(f), Some(s)) = (ema(closes, fast).last().copied(), ema(closes, slow).last().copied())
    else {
        return Trend::Flat;
    };
    if f > s {
        Trend::Up
    } else if f < s {
        Trend::Down
    } else {
        Trend::Flat
    }
}
