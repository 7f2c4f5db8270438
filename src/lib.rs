//! Band Reversion Backtester
//!
//! Backtests a long-only Bollinger band mean-reversion strategy and searches
//! its parameter space.
//!
//! - **Indicators**: rolling bands, EMA trend filter, relative-strength trend score
//! - **Backtester**: FLAT/LONG state machine with fee-aware entries, stop loss,
//!   trailing stop, band or moving-target exits, and an adaptive mode that
//!   switches the exit policy per bar from the trend score
//! - **Optimizer**: parallel five-dimension grid search with batched,
//!   retried persistence to SQLite and cooperative cancellation
//!
//! ## Example
//! ```no_run
//! use band_reversion::{backtest::{Backtester, MarketView}, data, indicators, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("configs/default.json")?;
//!     let bars = data::load_market(&config.market)?;
//!     let enriched = indicators::enrich(&bars, &config.indicators)?;
//!     let result = Backtester::new(config.strategy.clone())?.run(MarketView::new(&enriched))?;
//!     println!("Net profit: {:.2}", result.metrics.net_profit);
//!     Ok(())
//! }
//! ```

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod indicators;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod store;
pub mod types;

pub use config::{Config, StrategyConfig};
pub use error::{ConfigError, IndicatorError, OptimizerError, SimulationError, StoreError};
pub use metrics::{PerformanceMetrics, ProfitFactor};
pub use types::*;
