//! Error types for configuration, indicators, simulation and persistence

use thiserror::Error;

/// Rejected configuration values. Raised before any simulation starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("brokerage fee must be > 0 and < 100 percent, got {0}")]
    FeeOutOfRange(f64),

    #[error("stop loss must be >= 0 and < 100 percent, got {0}")]
    StopLossOutOfRange(f64),

    #[error("band distance must be strictly between -100 and 100 percent, got {0}")]
    BandDistanceOutOfRange(f64),

    #[error("minimum trend score must be within 0..=100, got {0}")]
    MinTrendScoreOutOfRange(f64),

    #[error("minimum profit must be >= 0 percent, got {0}")]
    NegativeMinProfit(f64),

    #[error("initial balance must be > 0, got {0}")]
    NonPositiveBalance(f64),

    #[error("{name} must be a positive period, got {value}")]
    InvalidPeriod { name: &'static str, value: usize },

    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("optimizer {name} must be > 0")]
    InvalidOptimizerSetting { name: &'static str },

    #[error("optimizer {name} must be <= {max}")]
    OptimizerSettingTooLarge { name: &'static str, max: usize },

    #[error("grid dimension '{0}' is empty")]
    EmptyGridDimension(&'static str),
}

/// Errors raised while computing indicators
#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("bar timestamps must be strictly increasing (violated at index {index})")]
    UnorderedBars { index: usize },
}

/// Errors raised by a simulation run
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("missing input: {0}")]
    MissingInput(String),
}

/// Persistence errors for bar and result stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("batch of {rows} rows failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        rows: usize,
        attempts: u32,
        message: String,
    },
}

/// Errors that stop a grid search before or during setup
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("result writer thread panicked")]
    WriterPanicked,
}
