//! Walk-forward driver.
//!
//! Bar `i` only ever sees `candles[..=i]`: detection, indicators and the trend
//! read are recomputed on that prefix, never on the full history.

use crate::config::{BotConfig, ConfigError, DetectorConfig};
use crate::cycle_detector::{CycleDetector, PivotFilters};
use crate::indicators::{self, Trend};
use crate::position_manager::{EntryRequest, PendingEntry, PendingOutcome, PositionManager};
use crate::types::{
    BotEvent, Candle, Cycle, CycleKey, Direction, EquityPoint, ExitReason, ManualCycle, Position, Side, Trade,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("candle {index} is malformed: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },
}

#[derive(Clone, Debug)]
pub struct SimulationResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_balance: f64,
    /// Left open at the last bar on purpose.
    pub open_position: Option<Position>,
}

/// How the last cycle of a direction relates to what earlier bars saw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CycleEvent {
    New,
    Updated,
    Processed,
}

/// Mutable state of one run. Never shared between runs.
#[derive(Clone, Debug)]
pub struct SimulationState {
    manager: PositionManager,
    equity_curve: Vec<EquityPoint>,
    last_traded_end: [Option<usize>; 2],
    tracked: HashMap<CycleKey, usize>,
}

impl SimulationState {
    fn new(bot: BotConfig) -> Self {
        SimulationState {
            manager: PositionManager::new(bot),
            equity_curve: Vec::new(),
            last_traded_end: [None; 2],
            tracked: HashMap::new(),
        }
    }

    pub fn manager(&self) -> &PositionManager {
        &self.manager
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn last_traded_end(&self, direction: Direction) -> Option<usize> {
        self.last_traded_end[direction.slot()]
    }

    fn classify(&mut self, cycle: &Cycle) -> CycleEvent {
        match self.tracked.insert(cycle.key(), cycle.end_index) {
            None => CycleEvent::New,
            Some(prev) if cycle.end_index > prev => CycleEvent::Updated,
            Some(prev) => {
                // Keep the furthest end seen so a shrink never replays as an update.
                self.tracked.insert(cycle.key(), prev.max(cycle.end_index));
                CycleEvent::Processed
            }
        }
    }
}

pub struct Simulator {
    detector: CycleDetector,
    bot: BotConfig,
    manual: Option<(Direction, ManualCycle)>,
    state: SimulationState,
}

impl Simulator {
    pub fn new(detector: DetectorConfig, bot: BotConfig) -> Result<Self, SimulationError> {
        detector.validate()?;
        bot.validate()?;
        Ok(Simulator {
            detector: CycleDetector::new(detector),
            state: SimulationState::new(bot.clone()),
            bot,
            manual: None,
        })
    }

    /// Pins one cycle of `direction` to the given span on every prefix that contains it.
    pub fn with_manual_cycle(mut self, direction: Direction, manual: ManualCycle) -> Self {
        self.manual = Some((direction, manual));
        self
    }

    /// First bar the walk evaluates.
    pub fn warmup(&self) -> usize {
        self.detector.config().max_duration
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.state.manager.position()
    }

    /// Closes whatever is open outside the bar loop (the live trader uses this when
    /// the exchange reports the position gone).
    pub fn force_close(&mut self, price: f64, index: usize, time: i64, reason: ExitReason) -> Option<Trade> {
        let trade = self.state.manager.close_position(1.0, price, index, time, reason);
        self.state.manager.drain_events();
        trade
    }

    pub fn run(&mut self, candles: &[Candle]) {
        for i in self.warmup()..candles.len() {
            self.step(candles, i);
        }
    }

    pub fn finish(self) -> SimulationResult {
        let SimulationState { manager, equity_curve, .. } = self.state;
        SimulationResult {
            final_balance: manager.balance(),
            open_position: manager.position().cloned(),
            trades: manager.into_trades(),
            equity_curve,
        }
    }

    fn manual_for(&self, direction: Direction) -> Option<ManualCycle> {
        self.manual.filter(|(d, _)| *d == direction).map(|(_, m)| m)
    }

    /// Evaluates bar `i` against `candles[..=i]` and returns the position changes
    /// it produced. Bars past `i` are never read.
    pub fn step(&mut self, candles: &[Candle], i: usize) -> Vec<BotEvent> {
        if i >= candles.len() {
            return Vec::new();
        }
        let prefix = &candles[..=i];
        let bar = &prefix[i];

        // ── Detection on the visible prefix ──────────────────────────────────
        let filters = PivotFilters::from_candles(prefix, self.detector.config());
        let detected: [Vec<Cycle>; 2] = Direction::ALL
            .map(|d| self.detector.detect_cycles(prefix, &filters, d, self.manual_for(d)));

        self.state
            .manager
            .set_cycle_averages(mean_amplitude(&detected[0]), mean_amplitude(&detected[1]));

        let atr = indicators::candle_atr(prefix, self.bot.atr_period)
            .last()
            .copied()
            .unwrap_or(0.0);
        let trend = if self.bot.ma_trend_filter {
            let closes = indicators::closes(prefix);
            indicators::trend(&closes, BotConfig::TREND_FAST_EMA, BotConfig::TREND_SLOW_EMA)
        } else {
            Trend::Flat
        };

        let mut new_cycles: Vec<Cycle> = Vec::new();
        let mut updated: Vec<Cycle> = Vec::new();
        for cycles in &detected {
            let Some(last) = cycles.last() else { continue };
            match self.state.classify(last) {
                CycleEvent::New => new_cycles.push(last.clone()),
                CycleEvent::Updated => updated.push(last.clone()),
                CycleEvent::Processed => {}
            }
            log::trace!(
                "idx={} last {:?} cycle {}..{} ext={} amp={:.4}",
                i, last.direction, last.start_index, last.end_index, last.extremum_index, last.amplitude
            );
        }

        // ── Signals ──────────────────────────────────────────────────────────
        for c in &new_cycles {
            if self.state.manager.cancel_pending_against(c.direction.side()) {
                log::debug!("idx={} pending signal dropped: new {:?} cycle", i, c.direction);
            }
        }

        if self.bot.multi_trade_enabled {
            for c in &updated {
                self.handle_cycle_update(c, bar, i, atr, trend);
            }
        }

        if self.state.manager.pending().is_some() {
            let side = self.state.manager.pending().map(|p| p.side);
            match self.state.manager.advance_pending(bar, i, atr) {
                PendingOutcome::Rejected(e) => log::debug!("idx={} confirmed {:?} refused: {}", i, side, e),
                PendingOutcome::Cancelled => log::debug!("idx={} pending {:?} cancelled", i, side),
                PendingOutcome::Opened | PendingOutcome::Waiting => {}
            }
        }

        for c in &new_cycles {
            if self.is_flat() && self.is_fresh(c, i) {
                self.take_signal(c, bar, i, atr, trend);
            }
        }

        // ── Exits ────────────────────────────────────────────────────────────
        if self.state.manager.position().is_some_and(|p| p.entry_index < i) {
            self.state.manager.check_exit(bar, i, &new_cycles);

            // A close on this bar frees the slot for a signal the open position blocked.
            for c in &new_cycles {
                if self.is_flat() && self.is_fresh(c, i) {
                    self.take_signal(c, bar, i, atr, trend);
                }
            }
        }

        self.state.equity_curve.push(EquityPoint {
            index: i,
            time: bar.time,
            balance: self.state.manager.balance(),
            equity: self.state.manager.equity(bar.close),
        });

        self.state.manager.drain_events()
    }

    fn is_flat(&self) -> bool {
        self.state.manager.position().is_none() && self.state.manager.pending().is_none()
    }

    /// A cycle signals only right after its end is confirmed and only once per end.
    fn is_fresh(&self, cycle: &Cycle, i: usize) -> bool {
        let recent = i.saturating_sub(cycle.end_index) <= self.detector.config().lookahead();
        let unused = self.state.last_traded_end[cycle.direction.slot()].map_or(true, |e| cycle.end_index > e);
        recent && unused
    }

    fn handle_cycle_update(&mut self, c: &Cycle, bar: &Candle, i: usize, atr: f64, trend: Trend) {
        if !self.is_fresh(c, i) {
            return;
        }
        let from_this_cycle = self
            .state
            .manager
            .position()
            .and_then(|p| p.origin_cycle.as_ref())
            .is_some_and(|o| o.key() == c.key());

        if from_this_cycle {
            log::debug!(
                "idx={} {:?} cycle {} extended to {} — rebasing",
                i, c.direction, c.start_index, c.end_index
            );
            self.state
                .manager
                .close_position(1.0, bar.close, i, bar.time, ExitReason::MultiTradeRebase);
            self.state.last_traded_end[c.direction.slot()] = Some(c.end_index);
            self.open_now(c, bar, i, atr, trend);
        } else if self.is_flat() {
            log::debug!(
                "idx={} {:?} cycle {} extended to {} — re-entry",
                i, c.direction, c.start_index, c.end_index
            );
            self.take_signal(c, bar, i, atr, trend);
        }
    }

    fn take_signal(&mut self, c: &Cycle, bar: &Candle, i: usize, atr: f64, trend: Trend) {
        self.state.last_traded_end[c.direction.slot()] = Some(c.end_index);
        if self.bot.three_bar_confirmation {
            let side = c.direction.side();
            self.state.manager.queue_pending(PendingEntry {
                side,
                origin: c.clone(),
                stop_price: c.end_price,
                counter_trend: is_counter_trend(side, trend),
                signal_index: i,
                favorable_bars: 0,
            });
        } else {
            self.open_now(c, bar, i, atr, trend);
        }
    }

    fn open_now(&mut self, c: &Cycle, bar: &Candle, i: usize, atr: f64, trend: Trend) {
        let side = c.direction.side();
        let req = EntryRequest {
            side,
            price: bar.close,
            index: i,
            time: bar.time,
            stop_price: c.end_price,
            counter_trend: is_counter_trend(side, trend),
            origin: Some(c.clone()),
            atr,
        };
        if let Err(e) = self.state.manager.open_position(req) {
            log::debug!("idx={} {} entry off cycle {}..{} refused: {}", i, side, c.start_index, c.end_index, e);
        }
    }
}

fn is_counter_trend(side: Side, trend: Trend) -> bool {
    matches!((side, trend), (Side::Long, Trend::Down) | (Side::Short, Trend::Up))
}

fn mean_amplitude(cycles: &[Cycle]) -> f64 {
    if cycles.is_empty() {
        return 0.0;
    }
    cycles.iter().map(|c| c.amplitude).sum::<f64>() / cycles.len() as f64
}

/// Rejects non-finite prices, inverted bars and non-increasing timestamps.
pub fn validate_candles(candles: &[Candle]) -> Result<(), SimulationError> {
    for (index, c) in candles.iter().enumerate() {
        let prices = [c.open, c.high, c.low, c.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(SimulationError::InvalidCandle { index, reason: "non-finite price" });
        }
        if c.high < c.low {
            return Err(SimulationError::InvalidCandle { index, reason: "high below low" });
        }
        if c.close <= 0.0 {
            return Err(SimulationError::InvalidCandle { index, reason: "non-positive close" });
        }
        if index > 0 && c.time <= candles[index - 1].time {
            return Err(SimulationError::InvalidCandle { index, reason: "time not increasing" });
        }
    }
    Ok(())
}

/// Replays `candles` bar by bar from `max_duration` and returns the trade log,
/// one equity sample per evaluated bar and the final balance.
pub fn simulate(
    candles: &[Candle],
    detector: &DetectorConfig,
    bot: &BotConfig,
) -> Result<SimulationResult, SimulationError> {
    validate_candles(candles)?;
    let mut sim = Simulator::new(detector.clone(), bot.clone())?;
    sim.run(candles);
    Ok(sim.finish())
}
