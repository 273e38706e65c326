use crate::config::DetectorConfig;
use crate::indicators;
use crate::types::{Candle, Cycle, Direction, ManualCycle, PivotKind};

/// Body share of its own range a confirming candle needs.
const CONFIRM_BODY_RATIO: f64 = 0.3;

/// Optional per-bar series gating pivot acceptance. A missing series never blocks.
#[derive(Clone, Debug, Default)]
pub struct PivotFilters {
    pub momentum: Option<Vec<f64>>,
    pub rsi: Option<Vec<f64>>,
    pub stoch_k: Option<Vec<f64>>,
}

impl PivotFilters {
    pub fn none() -> Self {
        Self::default()
    }

    /// Computes only the series the enabled filters need, from `candles` alone.
    pub fn from_candles(candles: &[Candle], cfg: &DetectorConfig) -> Self {
        let mut f = PivotFilters::none();
        if !cfg.use_momentum_filter && !cfg.use_rsi_stoch_filter {
            return f;
        }
        let closes = indicators::closes(candles);
        if cfg.use_momentum_filter {
            f.momentum = Some(indicators::momentum(&closes, cfg.momentum_period));
        }
        if cfg.use_rsi_stoch_filter {
            f.rsi = Some(indicators::rsi(&closes, cfg.rsi_period));
            let stoch = indicators::stochastic(
                &indicators::highs(candles),
                &indicators::lows(candles),
                &closes,
                cfg.stoch_k_period,
                cfg.stoch_d_period,
            );
            f.stoch_k = Some(stoch.k);
        }
        f
    }
}

/// Swing high at `i`: every bar up to `strength` to the left has a strictly lower
/// high, every bar to the right a high no greater. Ties on the right are tolerated,
/// ties on the left are not, so a flat top resolves to its earliest bar.
pub fn is_swing_high(candles: &[Candle], i: usize, strength: usize) -> bool {
    if strength == 0 || i < strength || i + strength >= candles.len() {
        return false;
    }
    let h = candles[i].high;
    (1..=strength).all(|k| candles[i - k].high < h && candles[i + k].high <= h)
}

/// Mirror of [`is_swing_high`] on lows.
pub fn is_swing_low(candles: &[Candle], i: usize, strength: usize) -> bool {
    if strength == 0 || i < strength || i + strength >= candles.len() {
        return false;
    }
    let l = candles[i].low;
    (1..=strength).all(|k| candles[i - k].low > l && candles[i + k].low >= l)
}

pub fn is_swing(candles: &[Candle], i: usize, strength: usize, kind: PivotKind) -> bool {
    match kind {
        PivotKind::High => is_swing_high(candles, i, strength),
        PivotKind::Low => is_swing_low(candles, i, strength),
    }
}

/// Scans up to `window` bars after the swing. A close through the extreme kills the
/// pivot; an opposite-colour candle with a real body confirms it.
pub fn confirm_pivot(candles: &[Candle], i: usize, kind: PivotKind, window: usize) -> bool {
    let extreme = kind.price(&candles[i]);
    let last = (i + window).min(candles.len().saturating_sub(1));
    for c in candles.iter().take(last + 1).skip(i + 1) {
        let broken = match kind {
            PivotKind::High => c.close >= extreme,
            PivotKind::Low => c.close <= extreme,
        };
        if broken {
            return false;
        }
        let reversal = match kind {
            PivotKind::High => c.is_red(),
            PivotKind::Low => c.is_green(),
        };
        let range = c.range();
        if reversal && range > 0.0 && c.body() >= CONFIRM_BODY_RATIO * range {
            return true;
        }
    }
    false
}

#[derive(Clone, Debug)]
pub struct CycleDetector {
    config: DetectorConfig,
}

impl CycleDetector {
    pub fn new(config: DetectorConfig) -> Self {
        CycleDetector { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detects the ordered, non-overlapping cycles of one direction.
    ///
    /// An empty result is normal for sparse data. With `manual`, detection runs up
    /// to the pinned start, the pinned span is emitted as-is, and detection resumes
    /// from the pinned end.
    pub fn detect_cycles(
        &self,
        candles: &[Candle],
        filters: &PivotFilters,
        direction: Direction,
        manual: Option<ManualCycle>,
    ) -> Vec<Cycle> {
        let mut cycles = Vec::new();
        if candles.is_empty() {
            return cycles;
        }
        let last = candles.len() - 1;

        match manual.filter(|m| m.start_index < m.end_index && m.end_index <= last) {
            Some(m) => {
                self.scan(candles, filters, direction, 0, m.start_index, &mut cycles);
                cycles.push(self.build_cycle(candles, direction, m.start_index, m.end_index, m.end_index));
                self.scan(candles, filters, direction, m.end_index, last, &mut cycles);
            }
            None => {
                if let Some(m) = manual {
                    log::warn!(
                        "manual cycle {}..{} outside 0..={} — ignored",
                        m.start_index, m.end_index, last
                    );
                }
                self.scan(candles, filters, direction, 0, last, &mut cycles);
            }
        }
        cycles
    }

    /// Start/end pivot test for `direction` at `i`: swing, filters, then confirmation.
    pub fn is_boundary_pivot(
        &self,
        candles: &[Candle],
        filters: &PivotFilters,
        direction: Direction,
        i: usize,
    ) -> bool {
        let kind = direction.boundary();
        is_swing(candles, i, self.config.swing_strength, kind)
            && self.passes_filters(filters, i, kind)
            && confirm_pivot(candles, i, kind, self.config.confirmation_window())
    }

    fn passes_filters(&self, filters: &PivotFilters, i: usize, kind: PivotKind) -> bool {
        let cfg = &self.config;
        if cfg.use_momentum_filter {
            if let Some(m) = filters.momentum.as_ref().and_then(|s| s.get(i)) {
                let ok = match kind {
                    PivotKind::Low => *m <= 0.0,
                    PivotKind::High => *m >= 0.0,
                };
                if !ok {
                    return false;
                }
            }
        }
        if cfg.use_rsi_stoch_filter {
            let rsi = filters.rsi.as_ref().and_then(|s| s.get(i)).copied();
            let k = filters.stoch_k.as_ref().and_then(|s| s.get(i)).copied();
            if rsi.is_some() || k.is_some() {
                let ok = match kind {
                    PivotKind::Low => {
                        rsi.is_some_and(|v| v <= cfg.rsi_oversold)
                            || k.is_some_and(|v| v <= cfg.stoch_oversold)
                    }
                    PivotKind::High => {
                        rsi.is_some_and(|v| v >= cfg.rsi_overbought)
                            || k.is_some_and(|v| v >= cfg.stoch_overbought)
                    }
                };
                if !ok {
                    return false;
                }
            }
        }
        true
    }

    /// Walks candidate starts in `[from, end_limit]`, never emitting a cycle that
    /// ends past `end_limit`. A rejected start advances one bar; an accepted one
    /// resumes the search at its end.
    fn scan(
        &self,
        candles: &[Candle],
        filters: &PivotFilters,
        direction: Direction,
        from: usize,
        end_limit: usize,
        out: &mut Vec<Cycle>,
    ) {
        let mut i = from.max(self.config.swing_strength);
        while i + self.config.min_duration <= end_limit {
            if self.is_boundary_pivot(candles, filters, direction, i) {
                if let Some(cycle) = self.find_cycle_end(candles, filters, direction, i, end_limit) {
                    i = cycle.end_index;
                    out.push(cycle);
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Chooses the end of the cycle starting at `start`, if any candidate in
    /// `[start + min, min(start + max, end_limit)]` is a valid pivot.
    pub fn find_cycle_end(
        &self,
        candles: &[Candle],
        filters: &PivotFilters,
        direction: Direction,
        start: usize,
        end_limit: usize,
    ) -> Option<Cycle> {
        let lo = start + self.config.min_duration;
        let hi = (start + self.config.max_duration)
            .min(end_limit)
            .min(candles.len().saturating_sub(1));
        if lo > hi {
            return None;
        }

        if self.config.prefer_shortest && self.is_boundary_pivot(candles, filters, direction, lo) {
            return Some(self.build_cycle(candles, direction, start, lo, lo));
        }

        let kind = direction.boundary();
        let mut first_valid: Option<usize> = None;
        let mut best: Option<usize> = None;
        for j in lo..=hi {
            if !self.is_boundary_pivot(candles, filters, direction, j) {
                continue;
            }
            first_valid.get_or_insert(j);
            let better = match best {
                None => true,
                Some(b) => kind.more_extreme(kind.price(&candles[j]), kind.price(&candles[b])),
            };
            if better {
                best = Some(j);
            }
        }

        let end = best?;
        Some(self.build_cycle(candles, direction, start, end, first_valid.unwrap_or(end)))
    }

    fn build_cycle(
        &self,
        candles: &[Candle],
        direction: Direction,
        start: usize,
        end: usize,
        first_potential_end: usize,
    ) -> Cycle {
        let boundary = direction.boundary();
        let ext_kind = boundary.opposite();
        let extremum_index = intermediate_extremum(candles, start, end, ext_kind);

        let start_price = boundary.price(&candles[start]);
        let extremum_price = ext_kind.price(&candles[extremum_index]);
        Cycle {
            direction,
            start_index: start,
            extremum_index,
            end_index: end,
            duration: end - start,
            amplitude: (extremum_price - start_price).abs(),
            start_price,
            extremum_price,
            end_price: boundary.price(&candles[end]),
            first_potential_end,
        }
    }
}

/// Most extreme bar strictly between `start` and `end`; earliest wins ties.
/// Falls back to the midpoint when the open interval is empty.
fn intermediate_extremum(candles: &[Candle], start: usize, end: usize, kind: PivotKind) -> usize {
    let mut best: Option<usize> = None;
    for j in (start + 1)..end {
        match best {
            Some(b) if !kind.more_extreme(kind.price(&candles[j]), kind.price(&candles[b])) => {}
            _ => best = Some(j),
        }
    }
    best.unwrap_or(start + (end - start) / 2)
}

impl Cycle {
    /// True once every bar the end search for this cycle could consult is inside
    /// `[0, last_index]`, so appending bars cannot change it.
    pub fn is_settled(&self, last_index: usize, cfg: &DetectorConfig) -> bool {
        self.start_index + cfg.max_duration + cfg.lookahead() <= last_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle { time: 0, open, high, low, close, volume: 1.0 }
    }

    /// Candle path through `closes`: open = previous close, wicks 0.2 beyond the body.
    fn path(closes: &[f64]) -> Vec<Candle> {
        let mut out = Vec::with_capacity(closes.len());
        let mut prev = closes[0];
        for (i, &c) in closes.iter().enumerate() {
            let o = if i == 0 { c } else { prev };
            out.push(Candle {
                time: i as i64 * 60_000,
                open: o,
                high: o.max(c) + 0.2,
                low: o.min(c) - 0.2,
                close: c,
                volume: 1.0,
            });
            prev = c;
        }
        out
    }

    fn ramp(from: f64, step: f64, n: usize) -> Vec<f64> {
        (1..=n).map(|k| from + step * k as f64).collect()
    }

    /// Falls to a low at 10, rallies to 22, falls to the lowest low at 37, rallies.
    fn w_series() -> Vec<Candle> {
        let mut closes = vec![120.0];
        closes.extend(ramp(120.0, -1.0, 10)); // 1..=10 → 110
        closes.extend(ramp(110.0, 1.0, 12)); // 11..=22 → 122
        closes.extend(ramp(122.0, -1.0, 15)); // 23..=37 → 107
        closes.extend(ramp(107.0, 1.0, 20)); // 38..=57 → 127
        closes.extend(std::iter::repeat(127.0).take(42)); // 58..=99
        path(&closes)
    }

    fn detector(min: usize, max: usize, strength: usize) -> CycleDetector {
        CycleDetector::new(DetectorConfig {
            min_duration: min,
            max_duration: max,
            swing_strength: strength,
            ..Default::default()
        })
    }

    #[test]
    fn swing_high_tolerates_right_tie_but_not_left_tie() {
        let right_tie = vec![
            bar(9.0, 10.0, 8.0, 9.5),
            bar(9.5, 12.0, 9.0, 11.0),
            bar(11.0, 12.0, 10.0, 10.5),
        ];
        assert!(is_swing_high(&right_tie, 1, 1));

        let left_tie = vec![
            bar(9.0, 12.0, 8.0, 9.5),
            bar(9.5, 12.0, 9.0, 11.0),
            bar(11.0, 11.0, 10.0, 10.5),
        ];
        assert!(!is_swing_high(&left_tie, 1, 1));
    }

    #[test]
    fn swing_low_mirrors_asymmetry() {
        let right_tie = vec![
            bar(10.0, 11.0, 9.0, 9.5),
            bar(9.5, 10.0, 7.0, 8.0),
            bar(8.0, 9.0, 7.0, 8.5),
        ];
        assert!(is_swing_low(&right_tie, 1, 1));

        let left_tie = vec![
            bar(10.0, 11.0, 7.0, 9.5),
            bar(9.5, 10.0, 7.0, 8.0),
            bar(8.0, 9.0, 7.5, 8.5),
        ];
        assert!(!is_swing_low(&left_tie, 1, 1));
    }

    #[test]
    fn swing_needs_bars_on_both_sides() {
        let c = path(&[10.0, 9.0, 10.0]);
        assert!(!is_swing_low(&c, 0, 1));
        assert!(!is_swing_low(&c, 2, 1));
        assert!(is_swing_low(&c, 1, 1));
        assert!(!is_swing_low(&c, 1, 2));
    }

    #[test]
    fn confirmation_rejects_close_through_extreme() {
        let c = vec![
            bar(10.0, 10.2, 8.8, 9.0),
            bar(9.0, 9.2, 7.8, 8.0), // low 7.8
            bar(8.0, 8.1, 7.0, 7.5), // close 7.5 <= 7.8
            bar(7.5, 9.0, 7.4, 8.9),
        ];
        assert!(!confirm_pivot(&c, 1, PivotKind::Low, 3));
    }

    #[test]
    fn confirmation_needs_a_real_reversal_body() {
        let doji = vec![
            bar(9.0, 9.2, 7.8, 8.0),
            bar(8.0, 9.0, 7.9, 8.05), // green but body 0.05 / range 1.1
            bar(8.05, 9.0, 7.9, 8.05),
        ];
        assert!(!confirm_pivot(&doji, 0, PivotKind::Low, 3));

        let strong = vec![
            bar(9.0, 9.2, 7.8, 8.0),
            bar(8.0, 9.0, 7.9, 8.8),
        ];
        assert!(confirm_pivot(&strong, 0, PivotKind::Low, 3));
    }

    #[test]
    fn confirmation_window_is_bounded() {
        // Reversal arrives on the 4th bar after the pivot; window 3 misses it.
        let c = vec![
            bar(9.0, 10.2, 9.8, 10.0), // high 10.2
            bar(10.0, 10.1, 9.9, 10.0),
            bar(10.0, 10.1, 9.9, 10.0),
            bar(10.0, 10.1, 9.9, 10.0),
            bar(10.0, 10.1, 9.0, 9.1),
        ];
        assert!(!confirm_pivot(&c, 0, PivotKind::High, 3));
        assert!(confirm_pivot(&c, 0, PivotKind::High, 4));
    }

    #[test]
    fn finds_single_inverted_cycle_ending_at_lowest_low() {
        let candles = w_series();
        let cycles = detector(10, 30, 1).detect_cycles(&candles, &PivotFilters::none(), Direction::Inverted, None);
        assert_eq!(cycles.len(), 1);
        let c = &cycles[0];
        assert_eq!(c.start_index, 10);
        assert_eq!(c.end_index, 37);
        assert_eq!(c.extremum_index, 22);
        assert_eq!(c.duration, 27);
        assert_eq!(c.first_potential_end, 37);
        let lowest = candles
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.low.partial_cmp(&b.1.low).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(c.end_index, lowest);
        assert!((c.amplitude - (122.2 - 109.8)).abs() < 1e-9);
    }

    #[test]
    fn no_normal_cycle_without_second_confirmed_high() {
        let candles = w_series();
        let cycles = detector(10, 30, 1).detect_cycles(&candles, &PivotFilters::none(), Direction::Normal, None);
        assert!(cycles.is_empty());
    }

    #[test]
    fn duration_bounds_are_enforced() {
        let candles = w_series();
        let cycles = detector(10, 20, 1).detect_cycles(&candles, &PivotFilters::none(), Direction::Inverted, None);
        assert!(cycles.is_empty());
    }

    #[test]
    fn prefer_shortest_takes_first_candidate() {
        // Lows at 5, 15 and 25 (25 deeper). Most-extreme picks 25, shortest picks 15.
        let mut closes = vec![110.0];
        closes.extend(ramp(110.0, -1.0, 5)); // →105 at 5
        closes.extend(ramp(105.0, 1.0, 5)); // →110 at 10
        closes.extend(ramp(110.0, -1.0, 5)); // →105 at 15
        closes.extend(ramp(105.0, 1.0, 5)); // →110 at 20
        closes.extend(ramp(110.0, -2.0, 5)); // →100 at 25
        closes.extend(ramp(100.0, 1.0, 10));
        let candles = path(&closes);

        let extreme = detector(10, 20, 1).detect_cycles(&candles, &PivotFilters::none(), Direction::Inverted, None);
        assert_eq!(extreme[0].start_index, 5);
        assert_eq!(extreme[0].end_index, 25);
        assert_eq!(extreme[0].first_potential_end, 15);

        let shortest = CycleDetector::new(DetectorConfig {
            min_duration: 10,
            max_duration: 20,
            prefer_shortest: true,
            ..Default::default()
        })
        .detect_cycles(&candles, &PivotFilters::none(), Direction::Inverted, None);
        assert_eq!(shortest[0].start_index, 5);
        assert_eq!(shortest[0].end_index, 15);
        // Search resumes at the previous end.
        assert_eq!(shortest[1].start_index, 15);
        assert_eq!(shortest[1].end_index, 25);
    }

    #[test]
    fn manual_cycle_is_inserted_verbatim() {
        let candles = w_series();
        let manual = ManualCycle { start_index: 40, end_index: 60 };
        let cycles = detector(10, 30, 1).detect_cycles(
            &candles,
            &PivotFilters::none(),
            Direction::Inverted,
            Some(manual),
        );
        // Natural 10→37 ends before the pinned start, so it survives.
        assert_eq!(cycles.len(), 2);
        assert_eq!((cycles[0].start_index, cycles[0].end_index), (10, 37));
        assert_eq!((cycles[1].start_index, cycles[1].end_index), (40, 60));
        assert!(cycles[1].extremum_index > 40 && cycles[1].extremum_index < 60);
    }

    #[test]
    fn manual_cycle_truncates_crossing_candidates() {
        let candles = w_series();
        let manual = ManualCycle { start_index: 30, end_index: 50 };
        let cycles = detector(10, 30, 1).detect_cycles(
            &candles,
            &PivotFilters::none(),
            Direction::Inverted,
            Some(manual),
        );
        assert_eq!(cycles.len(), 1);
        assert_eq!((cycles[0].start_index, cycles[0].end_index), (30, 50));
    }

    #[test]
    fn momentum_filter_blocks_lows_with_positive_momentum() {
        let candles = w_series();
        let det = CycleDetector::new(DetectorConfig { use_momentum_filter: true, ..Default::default() });
        let mut filters = PivotFilters::from_candles(&candles, det.config());
        assert!(!det.detect_cycles(&candles, &filters, Direction::Inverted, None).is_empty());

        filters.momentum = Some(vec![1.0; candles.len()]);
        assert!(det.detect_cycles(&candles, &filters, Direction::Inverted, None).is_empty());
    }

    #[test]
    fn rsi_or_stoch_must_be_oversold_at_lows() {
        let candles = w_series();
        let n = candles.len();
        let det = CycleDetector::new(DetectorConfig { use_rsi_stoch_filter: true, ..Default::default() });
        let neutral = PivotFilters { momentum: None, rsi: Some(vec![50.0; n]), stoch_k: Some(vec![50.0; n]) };
        assert!(det.detect_cycles(&candles, &neutral, Direction::Inverted, None).is_empty());

        // RSI clears the start, %K alone clears the end.
        let mut gated = neutral.clone();
        if let (Some(rsi), Some(k)) = (gated.rsi.as_mut(), gated.stoch_k.as_mut()) {
            rsi[10] = 35.0;
            k[37] = 15.0;
        }
        let cycles = det.detect_cycles(&candles, &gated, Direction::Inverted, None);
        assert_eq!(cycles.len(), 1);
        assert_eq!((cycles[0].start_index, cycles[0].end_index), (10, 37));

        // Only the start clears: the end low at 37 stays blocked.
        let mut start_only = neutral.clone();
        if let Some(rsi) = start_only.rsi.as_mut() {
            rsi[10] = 35.0;
        }
        assert!(det.detect_cycles(&candles, &start_only, Direction::Inverted, None).is_empty());
    }

    #[test]
    fn missing_oscillator_series_never_block() {
        let candles = w_series();
        let det = CycleDetector::new(DetectorConfig { use_rsi_stoch_filter: true, ..Default::default() });
        let cycles = det.detect_cycles(&candles, &PivotFilters::none(), Direction::Inverted, None);
        assert_eq!(cycles.len(), 1);

        let k_only = PivotFilters { stoch_k: Some(vec![50.0; candles.len()]), ..PivotFilters::none() };
        assert!(det.detect_cycles(&candles, &k_only, Direction::Inverted, None).is_empty());
    }

    #[test]
    fn empty_and_short_inputs_yield_nothing() {
        let det = detector(10, 30, 1);
        assert!(det.detect_cycles(&[], &PivotFilters::none(), Direction::Inverted, None).is_empty());
        let short = path(&[10.0, 9.0, 10.0, 11.0]);
        assert!(det.detect_cycles(&short, &PivotFilters::none(), Direction::Normal, None).is_empty());
    }
}
