use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(alias = "timestamp", alias = "ts")]
    pub time: i64, // ms epoch
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Shape of a structural swing.
///
/// Inverted: Low → High → Low, ends on a confirmed swing low and drives LONG entries.
/// Normal:   High → Low → High, ends on a confirmed swing high and drives SHORT entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Inverted,
    Normal,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Inverted, Direction::Normal];

    /// Pivot kind at both boundaries of the cycle.
    pub fn boundary(self) -> PivotKind {
        match self {
            Direction::Inverted => PivotKind::Low,
            Direction::Normal => PivotKind::High,
        }
    }

    pub fn side(self) -> Side {
        match self {
            Direction::Inverted => Side::Long,
            Direction::Normal => Side::Short,
        }
    }

    pub fn slot(self) -> usize {
        match self {
            Direction::Inverted => 0,
            Direction::Normal => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PivotKind {
    High,
    Low,
}

impl PivotKind {
    pub fn opposite(self) -> PivotKind {
        match self {
            PivotKind::High => PivotKind::Low,
            PivotKind::Low => PivotKind::High,
        }
    }

    pub fn price(self, candle: &Candle) -> f64 {
        match self {
            PivotKind::High => candle.high,
            PivotKind::Low => candle.low,
        }
    }

    /// `a` is strictly more extreme than `b` in this pivot's direction.
    pub fn more_extreme(self, a: f64, b: f64) -> bool {
        match self {
            PivotKind::High => a > b,
            PivotKind::Low => a < b,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for longs, −1 for shorts.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Side::Long => Direction::Inverted,
            Side::Short => Direction::Normal,
        }
    }

    /// Exchange order side that opens this position.
    pub fn order_side(self) -> &'static str {
        match self {
            Side::Long => "Buy",
            Side::Short => "Sell",
        }
    }

    /// Order side that reduces this position.
    pub fn opposite_order_side(self) -> &'static str {
        match self {
            Side::Long => "Sell",
            Side::Short => "Buy",
        }
    }

    pub fn from_order_side(s: &str) -> Option<Side> {
        match s {
            "Buy" => Some(Side::Long),
            "Sell" => Some(Side::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// One detected swing. All indices refer to the candle slice it was detected on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub direction: Direction,
    pub start_index: usize,
    pub extremum_index: usize,
    pub end_index: usize,
    pub duration: usize,
    pub amplitude: f64,
    pub start_price: f64,
    pub extremum_price: f64,
    pub end_price: f64,
    /// Earliest index that qualified as an end, possibly before `end_index`.
    pub first_potential_end: usize,
}

impl Cycle {
    pub fn key(&self) -> CycleKey {
        CycleKey { direction: self.direction, start_index: self.start_index }
    }

    pub fn meta(&self) -> CycleMeta {
        CycleMeta {
            direction: self.direction,
            start_index: self.start_index,
            extremum_index: self.extremum_index,
            end_index: self.end_index,
            amplitude: self.amplitude,
        }
    }
}

/// Identity of a cycle across walk-forward steps: its direction and where it started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CycleKey {
    pub direction: Direction,
    pub start_index: usize,
}

/// User-pinned cycle boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCycle {
    pub start_index: usize,
    pub end_index: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleMeta {
    pub direction: Direction,
    pub start_index: usize,
    pub extremum_index: usize,
    pub end_index: usize,
    pub amplitude: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub entry_index: usize,
    pub entry_time: i64,
    pub capital_used: f64,
    pub position_size: f64,
    pub sl_price: f64,
    pub tp1_price: Option<f64>,
    pub tp2_price: Option<f64>,
    pub partial_closed: bool,
    pub break_even_active: bool,
    pub trailing_active: bool,
    pub counter_trend: bool,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub max_drawdown_pct: f64,
    pub origin_cycle: Option<Cycle>,
}

impl Position {
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.position_size * self.side.sign()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "SL_CycleExtreme")]
    SlCycleExtreme,
    #[serde(rename = "TrailingStop")]
    TrailingStop,
    #[serde(rename = "MaxLoss")]
    MaxLoss,
    #[serde(rename = "BreakEven")]
    BreakEven,
    #[serde(rename = "TP1_Partial")]
    Tp1Partial,
    #[serde(rename = "TP2_Full")]
    Tp2Full,
    #[serde(rename = "CycleEnd")]
    CycleEnd,
    #[serde(rename = "OppositeCycle")]
    OppositeCycle,
    #[serde(rename = "MultiTrade_Rebase")]
    MultiTradeRebase,
    #[serde(rename = "External_Close")]
    ExternalClose,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::SlCycleExtreme => "SL_CycleExtreme",
            ExitReason::TrailingStop => "TrailingStop",
            ExitReason::MaxLoss => "MaxLoss",
            ExitReason::BreakEven => "BreakEven",
            ExitReason::Tp1Partial => "TP1_Partial",
            ExitReason::Tp2Full => "TP2_Full",
            ExitReason::CycleEnd => "CycleEnd",
            ExitReason::OppositeCycle => "OppositeCycle",
            ExitReason::MultiTradeRebase => "MultiTrade_Rebase",
            ExitReason::ExternalClose => "External_Close",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed full or partial close. Append-only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: i64,
    pub exit_time: i64,
    pub size: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub fees: f64,
    pub reason: ExitReason,
    pub partial: bool,
    pub fraction: f64,
    pub balance_after: f64,
    pub cycle: Option<CycleMeta>,
}

impl Trade {
    pub fn net_pnl(&self) -> f64 {
        self.pnl - self.fees
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub index: usize,
    pub time: i64,
    pub balance: f64,
    pub equity: f64,
}

/// Position changes produced by one walk-forward step, consumed by the live trader.
#[derive(Clone, Debug, PartialEq)]
pub enum BotEvent {
    Opened {
        side: Side,
        price: f64,
        size: f64,
        sl: f64,
        tp1: Option<f64>,
        tp2: Option<f64>,
    },
    Closed {
        side: Side,
        price: f64,
        size: f64,
        pnl: f64,
        reason: ExitReason,
        partial: bool,
    },
}
