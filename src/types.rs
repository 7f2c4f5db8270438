//! Core data types used across the backtester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::ProfitFactor;

/// Validation errors for bar data
#[derive(Debug, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV bar, one per exchange-reported period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(timestamp, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (trusted sources, synthetic test data)
    pub fn new_unchecked(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }
}

/// Trading pair symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Categorical market regime derived from the trend score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendStatus {
    StrongDown,
    Down,
    Sideways,
    Up,
    StrongUp,
}

impl TrendStatus {
    /// Map a 0-100 trend score onto its regime.
    ///
    /// Breakpoints: `<= 20` strong down, `<= 40` down, `<= 60` sideways,
    /// `<= 80` up, above that strong up.
    pub fn from_score(score: f64) -> Self {
        if score <= 20.0 {
            TrendStatus::StrongDown
        } else if score <= 40.0 {
            TrendStatus::Down
        } else if score <= 60.0 {
            TrendStatus::Sideways
        } else if score <= 80.0 {
            TrendStatus::Up
        } else {
            TrendStatus::StrongUp
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::StrongDown => "strong_down",
            TrendStatus::Down => "down",
            TrendStatus::Sideways => "sideways",
            TrendStatus::Up => "up",
            TrendStatus::StrongUp => "strong_up",
        }
    }
}

impl std::fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bollinger envelope for a single bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub mean: f64,
    pub std_dev: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bar plus every indicator the simulation reads.
///
/// `band` is `None` until the rolling window is warmed up. The EMA trend
/// filter lives in a separate [`crate::indicators::EmaColumn`] so that one
/// enriched sequence can be shared across many EMA periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBar {
    pub bar: Bar,
    pub band: Option<Band>,
    pub volume_buy: f64,
    pub volume_sell: f64,
    pub trend_score: f64,
    pub trend_status: TrendStatus,
}

impl EnrichedBar {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.bar.timestamp
    }

    pub fn close(&self) -> f64 {
        self.bar.close
    }
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Buy,
    Sell,
    StopLoss,
    TrailingStop,
}

impl TradeAction {
    /// True for every action that closes a position
    pub fn is_close(&self) -> bool {
        !matches!(self, TradeAction::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::StopLoss => "STOP_LOSS",
            TradeAction::TrailingStop => "TRAILING_STOP",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger record emitted by the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: DateTime<Utc>,
    pub action: TradeAction,
    pub price: f64,
    pub realized_pnl: f64,
    pub balance_after: f64,
    pub trend_score: f64,
    pub trend_status: TrendStatus,
    /// Buy/sell volume split of the bar the fill happened on
    pub volume_buy: f64,
    pub volume_sell: f64,
}

/// One qualifying grid point, as persisted by the optimizer.
///
/// The natural key is `(run_timestamp, symbol, interval)` plus the five
/// swept parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_timestamp: DateTime<Utc>,
    pub symbol: String,
    pub interval: String,
    pub grid_index: usize,
    pub band_distance_pct: f64,
    pub stop_loss_pct: f64,
    pub min_trend_score: f64,
    /// `None` when the EMA filter is disabled
    pub ema_period: Option<usize>,
    pub min_profit_pct: f64,
    pub net_profit: f64,
    /// Fraction of closed trades that won (0.0..=1.0)
    pub win_rate: f64,
    pub trade_count: usize,
    pub profit_factor: ProfitFactor,
}
