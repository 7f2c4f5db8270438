//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Path settings can be
//! overridden from the environment (a `.env` file is honoured by the binary),
//! but that happens once at startup: everything downstream receives an
//! immutable [`Config`] value.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::grid::GridParams;

pub const ENV_DATA_DIR: &str = "BAND_REVERSION_DATA_DIR";
pub const ENV_BAR_STORE: &str = "BAND_REVERSION_BAR_STORE";
pub const ENV_RESULTS_DB: &str = "BAND_REVERSION_RESULTS_DB";

/// Largest accepted `optimizer.batch_size`
pub const MAX_BATCH_SIZE: usize = 100_000;
/// Largest accepted `optimizer.top_n`
pub const MAX_TOP_N: usize = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file {}", path.as_ref().display())
        })?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Apply path overrides from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            self.market.data_dir = dir;
        }
        if let Ok(path) = std::env::var(ENV_BAR_STORE) {
            self.market.bar_store = Some(path);
        }
        if let Ok(path) = std::env::var(ENV_RESULTS_DB) {
            self.optimizer.results_db = path;
        }
    }

    /// Validate every section that can be checked without data
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indicators.validate()?;
        self.strategy.validate()?;
        self.optimizer.validate()?;
        Ok(())
    }
}

/// Where bars come from and which slice of history to use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbol: String,
    pub interval: String,
    /// Directory holding `{SYMBOL}_{interval}.csv` files
    pub data_dir: String,
    /// SQLite bar store; preferred over CSV files when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bar_store: Option<String>,
    /// Inclusive start, `YYYY-MM-DD HH:MM:SS` (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Inclusive end, `YYYY-MM-DD HH:MM:SS` (UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            data_dir: "data".to_string(),
            bar_store: None,
            start: None,
            end: None,
        }
    }
}

impl MarketConfig {
    /// Parsed `(start, end)` bounds
    pub fn time_range(&self) -> Result<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        let parse = |s: &Option<String>| -> Result<Option<NaiveDateTime>> {
            s.as_deref()
                .map(|v| {
                    NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S")
                        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD HH:MM:SS", v))
                })
                .transpose()
        };
        Ok((parse(&self.start)?, parse(&self.end)?))
    }
}

/// Indicator windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Rolling window for the band mean and deviation (default: 20)
    pub band_period: usize,
    /// Band width in standard deviations (default: 2.0)
    pub band_std: f64,
    /// Trend score smoothing period (default: 14)
    pub trend_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            band_period: 20,
            band_std: 2.0,
            trend_period: 14,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.band_period == 0 {
            return Err(ConfigError::InvalidPeriod {
                name: "band_period",
                value: self.band_period,
            });
        }
        if self.trend_period == 0 {
            return Err(ConfigError::InvalidPeriod {
                name: "trend_period",
                value: self.trend_period,
            });
        }
        if !self.band_std.is_finite() || self.band_std < 0.0 {
            return Err(ConfigError::NonFinite {
                name: "band_std",
                value: self.band_std,
            });
        }
        Ok(())
    }
}

/// Parameters of one simulation run.
///
/// All percentages are expressed in percent (`0.1` means 0.1%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Entry/exit tolerance around the bands (default: 0.5)
    pub band_distance_pct: f64,
    /// Initial stop distance below entry; `None` or `0` disables stops (default: 2.0)
    pub stop_loss_pct: Option<f64>,
    /// Flat fee charged on every fill (default: 0.1)
    pub brokerage_fee_pct: f64,
    /// Only enter above this EMA when set
    pub ema_filter_period: Option<usize>,
    /// Ratchet the stop upward as price advances (fixed mode only)
    pub use_trailing_stop: bool,
    /// Take profit at the upper band (fixed mode only)
    pub exit_at_upper_band: bool,
    /// Move the band target up with each new peak
    pub moving_target: bool,
    /// Required projected profit beyond fees (default: 0.0)
    pub min_profit_pct: f64,
    /// Minimum trend score for entries (default: 0)
    pub min_trend_score: f64,
    /// Pick exits per bar from the trend score instead of the fixed flags
    pub adaptive: bool,
    /// Starting account balance (default: 1000.0)
    pub initial_balance: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            band_distance_pct: 0.5,
            stop_loss_pct: Some(2.0),
            brokerage_fee_pct: 0.1,
            ema_filter_period: None,
            use_trailing_stop: false,
            exit_at_upper_band: true,
            moving_target: false,
            min_profit_pct: 0.0,
            min_trend_score: 0.0,
            adaptive: false,
            initial_balance: 1000.0,
        }
    }
}

impl StrategyConfig {
    /// Effective stop distance. A zero stop means no stop.
    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss_pct.filter(|s| *s > 0.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("band_distance_pct", self.band_distance_pct),
            ("brokerage_fee_pct", self.brokerage_fee_pct),
            ("min_profit_pct", self.min_profit_pct),
            ("min_trend_score", self.min_trend_score),
            ("initial_balance", self.initial_balance),
            ("stop_loss_pct", self.stop_loss_pct.unwrap_or(0.0)),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }

        if self.brokerage_fee_pct <= 0.0 || self.brokerage_fee_pct >= 100.0 {
            return Err(ConfigError::FeeOutOfRange(self.brokerage_fee_pct));
        }
        if let Some(stop) = self.stop_loss_pct {
            if !(0.0..100.0).contains(&stop) {
                return Err(ConfigError::StopLossOutOfRange(stop));
            }
        }
        if self.band_distance_pct.abs() >= 100.0 {
            return Err(ConfigError::BandDistanceOutOfRange(self.band_distance_pct));
        }
        if let Some(period) = self.ema_filter_period {
            if period == 0 {
                return Err(ConfigError::InvalidPeriod {
                    name: "ema_filter_period",
                    value: period,
                });
            }
        }
        if !(0.0..=100.0).contains(&self.min_trend_score) {
            return Err(ConfigError::MinTrendScoreOutOfRange(self.min_trend_score));
        }
        if self.min_profit_pct < 0.0 {
            return Err(ConfigError::NegativeMinProfit(self.min_profit_pct));
        }
        if self.initial_balance <= 0.0 {
            return Err(ConfigError::NonPositiveBalance(self.initial_balance));
        }
        Ok(())
    }
}

/// Single-run output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    /// Directory for ledger CSV/JSON output
    pub results_dir: String,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings {
            results_dir: "results".to_string(),
        }
    }
}

/// Grid search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// SQLite file receiving qualifying results
    pub results_db: String,
    /// Rows buffered before a flush to the store (default: 500)
    pub batch_size: usize,
    /// Worker threads; `None` uses every available core
    pub workers: Option<usize>,
    /// Number of ranked configurations to report (default: 3)
    pub top_n: usize,
    /// Attempts per batch before the batch is reported as failed (default: 3)
    pub store_attempts: u32,
    /// Backoff between attempts in milliseconds (default: 200)
    pub retry_backoff_ms: u64,
    /// Cancel remaining grid points after a batch exhausts its attempts
    pub halt_on_store_error: bool,
    pub grid: GridParams,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            results_db: "results/optimization.db".to_string(),
            batch_size: 500,
            workers: None,
            top_n: 3,
            store_attempts: 3,
            retry_backoff_ms: 200,
            halt_on_store_error: false,
            grid: GridParams::full(),
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidOptimizerSetting { name: "batch_size" });
        }
        if self.store_attempts == 0 {
            return Err(ConfigError::InvalidOptimizerSetting {
                name: "store_attempts",
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::InvalidOptimizerSetting { name: "workers" });
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::OptimizerSettingTooLarge {
                name: "batch_size",
                max: MAX_BATCH_SIZE,
            });
        }
        if self.top_n > MAX_TOP_N {
            return Err(ConfigError::OptimizerSettingTooLarge {
                name: "top_n",
                max: MAX_TOP_N,
            });
        }
        self.grid.validate()
    }
}
