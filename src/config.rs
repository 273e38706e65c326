use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// ─── Bybit ────────────────────────────────────────────────────────────────────
pub const BYBIT_REST_URL: &str = "https://api-demo.bybit.com";
pub const BYBIT_PUBLIC_URL: &str = "https://api.bybit.com";
// BYBIT_API_KEY, BYBIT_SECRET, TELEGRAM_TOKEN, TELEGRAM_CHAT_ID
// are read from environment variables at runtime

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ─── Detector ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_duration: usize,
    pub max_duration: usize,
    /// Bars on each side a swing extreme must dominate (1–3).
    pub swing_strength: usize,
    pub prefer_shortest: bool,
    pub use_momentum_filter: bool,
    pub use_rsi_stoch_filter: bool,
    pub momentum_period: usize,
    pub rsi_period: usize,
    pub stoch_k_period: usize,
    pub stoch_d_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            min_duration: 10,
            max_duration: 30,
            swing_strength: 1,
            prefer_shortest: false,
            use_momentum_filter: false,
            use_rsi_stoch_filter: false,
            momentum_period: 10,
            rsi_period: 14,
            stoch_k_period: 14,
            stoch_d_period: 3,
            rsi_oversold: 40.0,
            rsi_overbought: 60.0,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
        }
    }
}

impl DetectorConfig {
    /// Bars scanned after a swing for a confirming opposite-colour candle.
    pub fn confirmation_window(&self) -> usize {
        (self.swing_strength + 1).max(3)
    }

    /// Bars after a pivot needed before its validity is final.
    pub fn lookahead(&self) -> usize {
        self.confirmation_window().max(self.swing_strength)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_duration < 2 {
            return Err(invalid(format!("min_duration {} must be >= 2", self.min_duration)));
        }
        if self.max_duration < self.min_duration {
            return Err(invalid(format!(
                "max_duration {} below min_duration {}",
                self.max_duration, self.min_duration
            )));
        }
        if !(1..=3).contains(&self.swing_strength) {
            return Err(invalid(format!("swing_strength {} outside 1..=3", self.swing_strength)));
        }
        if self.momentum_period == 0
            || self.rsi_period == 0
            || self.stoch_k_period == 0
            || self.stoch_d_period == 0
        {
            return Err(invalid("indicator periods must be positive"));
        }
        Ok(())
    }
}

// ─── Bot ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub initial_balance: f64,
    pub leverage: f64,
    /// Share of balance committed as margin per entry, in percent.
    pub capital_percentage: f64,
    pub fees_enabled: bool,
    pub taker_fee_percent: f64,
    /// TP1 distance as a percentage of the trailing average cycle amplitude.
    pub tp1_avg_percent: f64,
    pub tp1_close_fraction: f64,
    pub tp2_avg_percent: f64,
    pub three_bar_confirmation: bool,
    pub close_on_opposite: bool,
    pub ma_trend_filter: bool,
    pub max_loss_enabled: bool,
    pub max_loss_percent: f64,
    pub multi_trade_enabled: bool,
    pub trailing_stop_enabled: bool,
    pub trailing_activation_pct: f64,
    pub trailing_callback_pct: f64,
    pub dynamic_exit_enabled: bool,
    pub sl_mult: f64,
    pub tp_mult: f64,
    pub atr_period: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig {
            initial_balance: 10_000.0,
            leverage: 10.0,
            capital_percentage: 10.0,
            fees_enabled: true,
            taker_fee_percent: 0.055,
            tp1_avg_percent: 50.0,
            tp1_close_fraction: 0.5,
            tp2_avg_percent: 100.0,
            three_bar_confirmation: false,
            close_on_opposite: false,
            ma_trend_filter: false,
            max_loss_enabled: false,
            max_loss_percent: 5.0,
            multi_trade_enabled: false,
            trailing_stop_enabled: false,
            trailing_activation_pct: 1.0,
            trailing_callback_pct: 0.5,
            dynamic_exit_enabled: false,
            sl_mult: 1.5,
            tp_mult: 2.0,
            atr_period: 14,
        }
    }
}

impl BotConfig {
    /// Consecutive favourable closes required by the entry confirmation gate.
    pub const CONFIRMATION_BARS: usize = 3;

    /// Entries whose stop sits this close to liquidation (as a share of margin) are refused.
    pub const MAX_SL_MARGIN_RISK: f64 = 0.9;

    pub const TREND_FAST_EMA: usize = 21;
    pub const TREND_SLOW_EMA: usize = 80;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_balance > 0.0) {
            return Err(invalid("initial_balance must be positive"));
        }
        if !(self.leverage > 0.0) {
            return Err(invalid(format!("leverage {} must be positive", self.leverage)));
        }
        if !(self.capital_percentage > 0.0 && self.capital_percentage <= 100.0) {
            return Err(invalid(format!(
                "capital_percentage {} outside (0, 100]",
                self.capital_percentage
            )));
        }
        if !(self.tp1_close_fraction > 0.0 && self.tp1_close_fraction < 1.0) {
            return Err(invalid(format!(
                "tp1_close_fraction {} outside (0, 1)",
                self.tp1_close_fraction
            )));
        }
        let non_negative = [
            ("taker_fee_percent", self.taker_fee_percent),
            ("tp1_avg_percent", self.tp1_avg_percent),
            ("tp2_avg_percent", self.tp2_avg_percent),
            ("max_loss_percent", self.max_loss_percent),
            ("trailing_activation_pct", self.trailing_activation_pct),
            ("trailing_callback_pct", self.trailing_callback_pct),
            ("sl_mult", self.sl_mult),
            ("tp_mult", self.tp_mult),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(invalid(format!("{name} {value} must be >= 0")));
            }
        }
        if self.atr_period == 0 {
            return Err(invalid("atr_period must be positive"));
        }
        Ok(())
    }

    pub fn fee_rate(&self) -> f64 {
        if self.fees_enabled {
            self.taker_fee_percent / 100.0
        } else {
            0.0
        }
    }
}

// ─── Live ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub symbol: String,
    /// Bybit kline interval ("1", "5", "15", "60", "240", "D", …).
    pub interval: String,
    pub kline_limit: usize,
    pub poll_secs: u64,
    /// Decimals used when formatting order quantities.
    pub qty_decimals: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        LiveConfig {
            symbol: "BTCUSDT".to_string(),
            interval: "15".to_string(),
            kline_limit: 200,
            poll_secs: 60,
            qty_decimals: 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub detector: DetectorConfig,
    pub bot: BotConfig,
    pub live: LiveConfig,
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        self.bot.validate()?;
        if self.live.kline_limit <= self.detector.max_duration {
            return Err(invalid(format!(
                "kline_limit {} must exceed max_duration {}",
                self.live.kline_limit, self.detector.max_duration
            )));
        }
        if self.live.poll_secs == 0 {
            return Err(invalid("poll_secs must be positive"));
        }
        Ok(())
    }
}
