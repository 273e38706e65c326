#![allow(dead_code)]

use cycle_trader::Candle;

pub const T0: i64 = 1_700_000_000_000;
pub const BAR_MS: i64 = 900_000;

/// Candle path through `closes`: open = previous close, wicks 0.2 beyond the body.
pub fn path(closes: &[f64]) -> Vec<Candle> {
    let mut prev = closes[0];
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let o = if i == 0 { c } else { prev };
            prev = c;
            Candle {
                time: T0 + i as i64 * BAR_MS,
                open: o,
                high: o.max(c) + 0.2,
                low: o.min(c) - 0.2,
                close: c,
                volume: 1.0,
            }
        })
        .collect()
}

pub fn ramp(from: f64, step: f64, n: usize) -> Vec<f64> {
    (1..=n).map(|k| from + step * k as f64).collect()
}

/// Low at 10, high at 22, lowest low at 37, rally to 57, then flat.
pub fn w_series() -> Vec<Candle> {
    let mut closes = vec![120.0];
    closes.extend(ramp(120.0, -1.0, 10));
    closes.extend(ramp(110.0, 1.0, 12));
    closes.extend(ramp(122.0, -1.0, 15));
    closes.extend(ramp(107.0, 1.0, 20));
    closes.extend(std::iter::repeat(127.0).take(42));
    path(&closes)
}

/// Compounds percentage steps from 100.
pub fn walk(steps: &[f64]) -> Vec<Candle> {
    let mut price = 100.0;
    let closes: Vec<f64> = std::iter::once(price)
        .chain(steps.iter().map(|s| {
            price *= 1.0 + s / 100.0;
            price
        }))
        .collect();
    path(&closes)
}
