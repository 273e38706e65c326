use crate::config::BotConfig;
use crate::types::{BotEvent, Candle, Cycle, ExitReason, Position, Side, Trade};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EntryError {
    #[error("a position is already open")]
    AlreadyOpen,

    #[error("invalid entry price {0}")]
    InvalidPrice(f64),

    #[error("no capital to commit (balance {balance:.2})")]
    NoCapital { balance: f64 },

    #[error("stop {stop:.6} is on the wrong side of entry {price:.6} for {side}")]
    StopOnWrongSide { side: Side, price: f64, stop: f64 },

    #[error("stop risk {risk_pct:.1}% of margin reaches the liquidation guard")]
    LiquidationRisk { risk_pct: f64 },
}

/// Everything `open_position` needs to size and lay out a trade.
#[derive(Clone, Debug)]
pub struct EntryRequest {
    pub side: Side,
    pub price: f64,
    pub index: usize,
    pub time: i64,
    /// Structural stop (the originating cycle's extreme); ignored in dynamic-exit mode.
    pub stop_price: f64,
    pub counter_trend: bool,
    pub origin: Option<Cycle>,
    pub atr: f64,
}

/// A signal waiting for consecutive favourable closes before it may open.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEntry {
    pub side: Side,
    pub origin: Cycle,
    pub stop_price: f64,
    pub counter_trend: bool,
    pub signal_index: usize,
    pub favorable_bars: usize,
}

/// Outcome of advancing the confirmation gate by one bar.
#[derive(Debug, PartialEq)]
pub enum PendingOutcome {
    Waiting,
    Cancelled,
    Opened,
    Rejected(EntryError),
}

/// The exit-rule settings `check_exit` reads while the position is borrowed.
#[derive(Clone, Copy, Debug)]
struct ExitRules {
    initial_balance: f64,
    leverage: f64,
    tp1_close_fraction: f64,
    close_on_opposite: bool,
    max_loss_enabled: bool,
    max_loss_percent: f64,
    trailing_stop_enabled: bool,
    trailing_activation_pct: f64,
    trailing_callback_pct: f64,
}

impl From<&BotConfig> for ExitRules {
    fn from(c: &BotConfig) -> Self {
        ExitRules {
            initial_balance: c.initial_balance,
            leverage: c.leverage,
            tp1_close_fraction: c.tp1_close_fraction,
            close_on_opposite: c.close_on_opposite,
            max_loss_enabled: c.max_loss_enabled,
            max_loss_percent: c.max_loss_percent,
            trailing_stop_enabled: c.trailing_stop_enabled,
            trailing_activation_pct: c.trailing_activation_pct,
            trailing_callback_pct: c.trailing_callback_pct,
        }
    }
}

/// Single-position state machine: balance, the live position, the trade log and
/// the pending-confirmation slot. One instance per run; never shared.
#[derive(Clone, Debug)]
pub struct PositionManager {
    config: BotConfig,
    balance: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
    pending: Option<PendingEntry>,
    avg_index_pump: f64,
    avg_inverse_drop: f64,
    events: Vec<BotEvent>,
}

impl PositionManager {
    pub fn new(config: BotConfig) -> Self {
        PositionManager {
            balance: config.initial_balance,
            config,
            position: None,
            trades: Vec::new(),
            pending: None,
            avg_index_pump: 0.0,
            avg_inverse_drop: 0.0,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn take_position(&mut self) -> Option<Position> {
        self.position.take()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    pub fn pending(&self) -> Option<&PendingEntry> {
        self.pending.as_ref()
    }

    pub fn avg_index_pump(&self) -> f64 {
        self.avg_index_pump
    }

    pub fn avg_inverse_drop(&self) -> f64 {
        self.avg_inverse_drop
    }

    /// Trailing average amplitudes used to place TP1/TP2 outside dynamic-exit mode.
    pub fn set_cycle_averages(&mut self, avg_index_pump: f64, avg_inverse_drop: f64) {
        self.avg_index_pump = avg_index_pump;
        self.avg_inverse_drop = avg_inverse_drop;
    }

    pub fn equity(&self, price: f64) -> f64 {
        self.balance + self.position.as_ref().map_or(0.0, |p| p.unrealized_pnl(price))
    }

    pub fn drain_events(&mut self) -> Vec<BotEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Entry ─────────────────────────────────────────────────────────────────

    pub fn open_position(&mut self, req: EntryRequest) -> Result<&Position, EntryError> {
        if self.position.is_some() {
            return Err(EntryError::AlreadyOpen);
        }
        let price = req.price;
        if !(price.is_finite() && price > 0.0) {
            return Err(EntryError::InvalidPrice(price));
        }

        let cfg = &self.config;
        let mut capital = self.balance * cfg.capital_percentage / 100.0;
        if req.counter_trend {
            capital *= 0.5;
        }
        if !(capital > 0.0) {
            return Err(EntryError::NoCapital { balance: self.balance });
        }
        let size = capital * cfg.leverage / price;
        let sign = req.side.sign();

        let (sl, tp1, tp2) = if cfg.dynamic_exit_enabled && req.atr > 0.0 {
            let sl_dist = req.atr * cfg.sl_mult;
            let tp1_dist = req.atr * cfg.tp_mult;
            let tp2_dist = 2.0 * tp1_dist;
            let risk = sl_dist / price * cfg.leverage;
            if risk >= BotConfig::MAX_SL_MARGIN_RISK {
                log::debug!(
                    "{} entry @ {:.4} refused: ATR stop {:.4} risks {:.1}% of margin",
                    req.side, price, sl_dist, risk * 100.0
                );
                return Err(EntryError::LiquidationRisk { risk_pct: risk * 100.0 });
            }
            (
                price - sign * sl_dist,
                target(price, sign, tp1_dist),
                target(price, sign, tp2_dist),
            )
        } else {
            let stop = req.stop_price;
            let wrong_side = match req.side {
                Side::Long => !(stop < price),
                Side::Short => !(stop > price),
            };
            if wrong_side {
                return Err(EntryError::StopOnWrongSide { side: req.side, price, stop });
            }
            let avg = match req.side {
                Side::Long => self.avg_index_pump,
                Side::Short => self.avg_inverse_drop,
            };
            (
                stop,
                target(price, sign, avg * cfg.tp1_avg_percent / 100.0),
                target(price, sign, avg * cfg.tp2_avg_percent / 100.0),
            )
        };

        log::debug!(
            "open {} @ {:.4} idx={} size={:.6} margin={:.2} sl={:.4} tp1={:?} tp2={:?}{}",
            req.side, price, req.index, size, capital, sl, tp1, tp2,
            if req.counter_trend { " (counter-trend)" } else { "" }
        );
        self.events.push(BotEvent::Opened { side: req.side, price, size, sl, tp1, tp2 });

        Ok(&*self.position.insert(Position {
            side: req.side,
            entry_price: price,
            entry_index: req.index,
            entry_time: req.time,
            capital_used: capital,
            position_size: size,
            sl_price: sl,
            tp1_price: tp1,
            tp2_price: tp2,
            partial_closed: false,
            break_even_active: false,
            trailing_active: false,
            counter_trend: req.counter_trend,
            highest_price: price,
            lowest_price: price,
            max_drawdown_pct: 0.0,
            origin_cycle: req.origin,
        }))
    }

    // ── Closing ───────────────────────────────────────────────────────────────

    /// Closes `fraction` of the open position at `price`. Partial closes shrink the
    /// position in place; a full close clears it.
    pub fn close_position(
        &mut self,
        fraction: f64,
        price: f64,
        index: usize,
        time: i64,
        reason: ExitReason,
    ) -> Option<Trade> {
        let fee_rate = self.config.fee_rate();
        let pos = self.position.as_mut()?;
        let fraction = fraction.clamp(0.0, 1.0);
        let partial = fraction < 1.0;

        let closed_size = pos.position_size * fraction;
        let closed_capital = pos.capital_used * fraction;
        let pnl = (price - pos.entry_price) * closed_size * pos.side.sign();
        let fees = (pos.entry_price + price) * closed_size * fee_rate;
        self.balance += pnl - fees;

        let trade = Trade {
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: price,
            entry_index: pos.entry_index,
            exit_index: index,
            entry_time: pos.entry_time,
            exit_time: time,
            size: closed_size,
            pnl,
            pnl_percent: if closed_capital > 0.0 { pnl / closed_capital * 100.0 } else { 0.0 },
            fees,
            reason,
            partial,
            fraction,
            balance_after: self.balance,
            cycle: pos.origin_cycle.as_ref().map(Cycle::meta),
        };

        log::debug!(
            "close {} {:.0}% @ {:.4} idx={} reason={} pnl={:+.2} fees={:.2} balance={:.2}",
            pos.side, fraction * 100.0, price, index, reason, pnl, fees, self.balance
        );
        self.events.push(BotEvent::Closed {
            side: pos.side,
            price,
            size: closed_size,
            pnl,
            reason,
            partial,
        });

        if partial {
            pos.capital_used -= closed_capital;
            pos.position_size -= closed_size;
        } else {
            self.position = None;
        }
        self.trades.push(trade.clone());
        Some(trade)
    }

    /// Evaluates the exit rules for one bar in fixed priority order; the first
    /// match closes (fully or partially) and ends the evaluation.
    /// `completed` holds cycles that finished on this bar.
    pub fn check_exit(&mut self, candle: &Candle, index: usize, completed: &[Cycle]) -> Option<ExitReason> {
        let cfg = ExitRules::from(&self.config);
        let pos = self.position.as_mut()?;
        let long = pos.side == Side::Long;
        let entry = pos.entry_price;

        // 1. Trailing extremes and stop ratchet.
        pos.highest_price = pos.highest_price.max(candle.high);
        pos.lowest_price = pos.lowest_price.min(candle.low);
        let adverse = if long {
            (entry - pos.lowest_price) / entry * 100.0
        } else {
            (pos.highest_price - entry) / entry * 100.0
        };
        pos.max_drawdown_pct = pos.max_drawdown_pct.max(adverse);

        if cfg.trailing_stop_enabled {
            let favorable = if long {
                (pos.highest_price - entry) / entry * 100.0
            } else {
                (entry - pos.lowest_price) / entry * 100.0
            };
            if favorable >= cfg.trailing_activation_pct {
                pos.trailing_active = true;
                if long {
                    let candidate = pos.highest_price * (1.0 - cfg.trailing_callback_pct / 100.0);
                    if candidate > pos.sl_price {
                        pos.sl_price = candidate;
                    }
                } else {
                    let candidate = pos.lowest_price * (1.0 + cfg.trailing_callback_pct / 100.0);
                    if candidate < pos.sl_price {
                        pos.sl_price = candidate;
                    }
                }
            }
        }

        // 2. Stop on close.
        let stop_crossed = if long { candle.close <= pos.sl_price } else { candle.close >= pos.sl_price };
        if stop_crossed && pos.trailing_active {
            return self.exit_full(candle.close, index, candle.time, ExitReason::TrailingStop);
        }
        if stop_crossed && !pos.break_even_active {
            return self.exit_full(candle.close, index, candle.time, ExitReason::SlCycleExtreme);
        }

        // 3. Max loss against starting balance, on close only.
        if cfg.max_loss_enabled {
            let notional = pos.capital_used * cfg.leverage;
            if notional > 0.0 {
                let allowed_move = cfg.initial_balance * cfg.max_loss_percent / 100.0 / notional;
                let hit = if long {
                    candle.close <= entry * (1.0 - allowed_move)
                } else {
                    candle.close >= entry * (1.0 + allowed_move)
                };
                if hit {
                    return self.exit_full(candle.close, index, candle.time, ExitReason::MaxLoss);
                }
            }
        }

        // 4. Break-even.
        if pos.break_even_active {
            let touched = if long { candle.low <= entry } else { candle.high >= entry };
            if touched {
                return self.exit_full(entry, index, candle.time, ExitReason::BreakEven);
            }
        }

        // 5. TP1 partial.
        if !pos.partial_closed {
            if let Some(tp1) = pos.tp1_price {
                let reached = if long { candle.high >= tp1 } else { candle.low <= tp1 };
                if reached {
                    pos.partial_closed = true;
                    pos.break_even_active = true;
                    self.close_position(cfg.tp1_close_fraction, tp1, index, candle.time, ExitReason::Tp1Partial);
                    return Some(ExitReason::Tp1Partial);
                }
            }
        }

        // 6. TP2 on the remainder.
        if pos.partial_closed {
            if let Some(tp2) = pos.tp2_price {
                let reached = if long { candle.high >= tp2 } else { candle.low <= tp2 };
                if reached {
                    return self.exit_full(tp2, index, candle.time, ExitReason::Tp2Full);
                }
            }
        }

        // 7. Cycle completion after entry.
        let own = pos.side.direction();
        let origin = pos.origin_cycle.as_ref().map(Cycle::key);
        let entry_index = pos.entry_index;
        let reason = completed
            .iter()
            .filter(|c| c.end_index > entry_index && Some(c.key()) != origin)
            .find_map(|c| {
                if c.direction == own {
                    Some(ExitReason::CycleEnd)
                } else if cfg.close_on_opposite {
                    Some(ExitReason::OppositeCycle)
                } else {
                    None
                }
            });
        match reason {
            Some(r) => self.exit_full(candle.close, index, candle.time, r),
            None => None,
        }
    }

    fn exit_full(&mut self, price: f64, index: usize, time: i64, reason: ExitReason) -> Option<ExitReason> {
        self.close_position(1.0, price, index, time, reason).map(|t| t.reason)
    }

    // ── Confirmation gate ─────────────────────────────────────────────────────

    pub fn queue_pending(&mut self, pending: PendingEntry) {
        log::debug!(
            "pending {} from cycle {}..{} at idx={}",
            pending.side, pending.origin.start_index, pending.origin.end_index, pending.signal_index
        );
        self.pending = Some(pending);
    }

    pub fn cancel_pending(&mut self) -> Option<PendingEntry> {
        self.pending.take()
    }

    /// Drops a pending signal whose side opposes a freshly detected cycle.
    pub fn cancel_pending_against(&mut self, new_side: Side) -> bool {
        if self.pending.as_ref().is_some_and(|p| p.side != new_side) {
            self.pending = None;
            return true;
        }
        false
    }

    /// Counts favourable closes after the signal bar; any unfavourable close cancels.
    pub fn advance_pending(&mut self, candle: &Candle, index: usize, atr: f64) -> PendingOutcome {
        let Some(p) = self.pending.as_mut() else {
            return PendingOutcome::Waiting;
        };
        if index <= p.signal_index {
            return PendingOutcome::Waiting;
        }
        let favorable = match p.side {
            Side::Long => candle.close > p.origin.end_price,
            Side::Short => candle.close < p.origin.end_price,
        };
        if !favorable {
            log::debug!("pending {} cancelled at idx={} (close {:.4})", p.side, index, candle.close);
            self.pending = None;
            return PendingOutcome::Cancelled;
        }
        p.favorable_bars += 1;
        if p.favorable_bars < BotConfig::CONFIRMATION_BARS {
            return PendingOutcome::Waiting;
        }

        let Some(p) = self.pending.take() else {
            return PendingOutcome::Waiting;
        };
        let req = EntryRequest {
            side: p.side,
            price: candle.close,
            index,
            time: candle.time,
            stop_price: p.stop_price,
            counter_trend: p.counter_trend,
            origin: Some(p.origin),
            atr,
        };
        match self.open_position(req) {
            Ok(_) => PendingOutcome::Opened,
            Err(e) => PendingOutcome::Rejected(e),
        }
    }
}

fn target(price: f64, sign: f64, distance: f64) -> Option<f64> {
    (distance > 0.0).then(|| price + sign * distance)
}
