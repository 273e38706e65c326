//! Property tests over random price walks.
//!
//! 1. Cycle lists are ordered, non-overlapping and inside the duration bounds
//! 2. Settled cycles never change when more bars arrive
//! 3. Stepping a prefix matches stepping the full series
//! 4. Trailing stops only tighten

mod common;

use common::walk;
use cycle_trader::cycle_detector::PivotFilters;
use cycle_trader::position_manager::{EntryRequest, PositionManager};
use cycle_trader::{BotConfig, CycleDetector, DetectorConfig, Direction, Side, Simulator};
use proptest::prelude::*;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_steps() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-2.0..2.0_f64, 60..160)
}

fn arb_detector() -> impl Strategy<Value = DetectorConfig> {
    (4usize..12, 0usize..20, 1usize..=3, any::<bool>()).prop_map(|(min, extra, strength, shortest)| {
        DetectorConfig {
            min_duration: min,
            max_duration: min + extra,
            swing_strength: strength,
            prefer_shortest: shortest,
            ..Default::default()
        }
    })
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Normal), Just(Direction::Inverted)]
}

// ── 1-2. Detector ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn cycles_are_ordered_and_bounded(steps in arb_steps(), cfg in arb_detector(), dir in arb_direction()) {
        let candles = walk(&steps);
        let det = CycleDetector::new(cfg.clone());
        let cycles = det.detect_cycles(&candles, &PivotFilters::none(), dir, None);

        for c in &cycles {
            prop_assert_eq!(c.direction, dir);
            prop_assert!(c.start_index < c.extremum_index && c.extremum_index < c.end_index);
            prop_assert!(c.end_index < candles.len());
            prop_assert_eq!(c.duration, c.end_index - c.start_index);
            prop_assert!(c.duration >= cfg.min_duration && c.duration <= cfg.max_duration);
            prop_assert!(c.amplitude >= 0.0);
        }
        for w in cycles.windows(2) {
            prop_assert!(w[1].start_index >= w[0].end_index);
        }
    }

    #[test]
    fn settled_cycles_are_final(steps in arb_steps(), cut in 20usize..60, dir in arb_direction()) {
        let candles = walk(&steps);
        let cfg = DetectorConfig { min_duration: 5, max_duration: 15, ..Default::default() };
        let det = CycleDetector::new(cfg.clone());
        let full = det.detect_cycles(&candles, &PivotFilters::none(), dir, None);
        let prefix = &candles[..cut];
        let partial = det.detect_cycles(prefix, &PivotFilters::none(), dir, None);

        for c in partial.iter().filter(|c| c.is_settled(cut - 1, &cfg)) {
            prop_assert!(full.contains(c));
        }
    }
}

// ── 3. Walk-forward has no lookahead ─────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prefix_steps_match_full_steps(steps in arb_steps()) {
        let candles = walk(&steps);
        let det = DetectorConfig { min_duration: 5, max_duration: 15, ..Default::default() };
        let mut full = Simulator::new(det.clone(), BotConfig::default()).unwrap();
        let mut cut = Simulator::new(det, BotConfig::default()).unwrap();

        for i in full.warmup()..candles.len() {
            let a = full.step(&candles, i);
            let b = cut.step(&candles[..=i], i);
            prop_assert_eq!(a, b);
        }
        prop_assert_eq!(full.state().equity_curve(), cut.state().equity_curve());
    }
}

// ── 4. Ratchet monotonicity ──────────────────────────────────────────

fn trailing_manager(side: Side) -> PositionManager {
    let mut pm = PositionManager::new(BotConfig {
        trailing_stop_enabled: true,
        trailing_activation_pct: 0.5,
        trailing_callback_pct: 0.3,
        ..Default::default()
    });
    let stop = match side {
        Side::Long => 80.0,
        Side::Short => 120.0,
    };
    pm.open_position(EntryRequest {
        side,
        price: 100.0,
        index: 0,
        time: 0,
        stop_price: stop,
        counter_trend: false,
        origin: None,
        atr: 0.0,
    })
    .unwrap();
    pm
}

proptest! {
    #[test]
    fn long_stop_never_loosens(steps in arb_steps()) {
        let candles = walk(&steps);
        let mut pm = trailing_manager(Side::Long);
        let mut prev = pm.position().unwrap().sl_price;
        for (i, c) in candles.iter().enumerate().skip(1) {
            pm.check_exit(c, i, &[]);
            let Some(pos) = pm.position() else { break };
            prop_assert!(pos.sl_price >= prev);
            prev = pos.sl_price;
        }
    }

    #[test]
    fn short_stop_never_loosens(steps in arb_steps()) {
        let candles = walk(&steps);
        let mut pm = trailing_manager(Side::Short);
        let mut prev = pm.position().unwrap().sl_price;
        for (i, c) in candles.iter().enumerate().skip(1) {
            pm.check_exit(c, i, &[]);
            let Some(pos) = pm.position() else { break };
            prop_assert!(pos.sl_price <= prev);
            prev = pos.sl_price;
        }
    }
}
