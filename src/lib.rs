//! Swing-cycle detection and a leveraged single-position trading engine,
//! shared by the live bot and the batch backtest/optimize binaries.

pub mod bybit_api;
pub mod config;
pub mod cycle_detector;
pub mod data;
pub mod indicators;
pub mod live;
pub mod optimizer;
pub mod position_manager;
pub mod simulation;
pub mod stats;
pub mod telegram;
pub mod types;

pub use config::{BotConfig, DetectorConfig, Settings};
pub use cycle_detector::CycleDetector;
pub use simulation::{simulate, SimulationResult, Simulator};
pub use types::{Candle, Cycle, Direction, ExitReason, Side, Trade};
