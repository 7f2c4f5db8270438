//! Backtesting engine
//!
//! Bar-by-bar long-only simulation with two states, FLAT and LONG. Each bar
//! is evaluated in a fixed order:
//!
//! 1. Resolve the exit policy (per bar in adaptive mode)
//! 2. While LONG: ratchet the trailing stop and advance the moving target
//! 3. While LONG with a stop: exit at or below the stop, then skip the bar
//! 4. While FLAT: evaluate the entry filters and the fee-aware profit gate
//! 5. Otherwise, while LONG with band exit active: exit at the target
//!
//! Fills happen at the bar close. Every fill pays the brokerage fee on its
//! gross value. The balance only changes when a position closes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StrategyConfig;
use crate::error::{ConfigError, SimulationError};
use crate::indicators::EmaColumn;
use crate::metrics::PerformanceMetrics;
use crate::types::{EnrichedBar, TradeAction, TradeEvent};

/// Trend score above which adaptive mode switches to trailing-only exits
pub const ADAPTIVE_TREND_THRESHOLD: f64 = 60.0;

/// Adaptive mode never enters below this trend score
pub const ADAPTIVE_MIN_TREND_SCORE: f64 = 20.0;

/// How an open position may be closed on a given bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Strong uptrend: let the trailing stop ride, no band target
    TrailingOnly,
    /// Take profit at the upper band, stop does not trail
    BandExit,
    /// Flags taken verbatim from the configuration
    Fixed { trailing: bool, band_exit: bool },
}

impl ExitPolicy {
    pub fn resolve(config: &StrategyConfig, trend_score: f64) -> Self {
        if !config.adaptive {
            return ExitPolicy::Fixed {
                trailing: config.use_trailing_stop,
                band_exit: config.exit_at_upper_band,
            };
        }
        if trend_score > ADAPTIVE_TREND_THRESHOLD {
            ExitPolicy::TrailingOnly
        } else {
            ExitPolicy::BandExit
        }
    }

    pub fn trailing(&self) -> bool {
        match self {
            ExitPolicy::TrailingOnly => true,
            ExitPolicy::BandExit => false,
            ExitPolicy::Fixed { trailing, .. } => *trailing,
        }
    }

    pub fn band_exit(&self) -> bool {
        match self {
            ExitPolicy::TrailingOnly => false,
            ExitPolicy::BandExit => true,
            ExitPolicy::Fixed { band_exit, .. } => *band_exit,
        }
    }

    /// One-line description of how `config` exits positions
    pub fn describe(config: &StrategyConfig) -> String {
        let target = if config.moving_target {
            "moving target"
        } else {
            "upper band target"
        };
        if config.adaptive {
            return format!(
                "adaptive: trailing stop only above trend score {}, {} otherwise",
                ADAPTIVE_TREND_THRESHOLD, target
            );
        }
        let stop = match config.stop_loss() {
            None => "no stop",
            Some(_) if config.use_trailing_stop => "trailing stop",
            Some(_) => "fixed stop",
        };
        if config.exit_at_upper_band {
            format!("{} and {}", stop, target)
        } else {
            format!("{}, no target exit", stop)
        }
    }
}

/// Inputs of one run: the enriched bars and, when the EMA filter is used,
/// the EMA column for the configured period.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    pub bars: &'a [EnrichedBar],
    pub ema: Option<&'a EmaColumn>,
}

impl<'a> MarketView<'a> {
    pub fn new(bars: &'a [EnrichedBar]) -> Self {
        MarketView { bars, ema: None }
    }

    pub fn with_ema(mut self, ema: &'a EmaColumn) -> Self {
        self.ema = Some(ema);
        self
    }
}

/// An open long position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    /// Absent when the run has no stop configured
    pub stop_price: Option<f64>,
    pub dynamic_target: f64,
    pub peak_price: f64,
}

#[derive(Debug)]
enum State {
    Flat,
    Long(Position),
}

/// Outcome of a single run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Parameters the run was made with
    pub config: StrategyConfig,
    pub events: Vec<TradeEvent>,
    pub initial_balance: f64,
    /// Cash balance after the last closing event
    pub final_balance: f64,
    /// Position still open when the bars ran out. It is not liquidated and
    /// does not count towards `final_balance` or the metrics.
    pub open_position: Option<Position>,
    pub metrics: PerformanceMetrics,
}

/// Backtest engine for one validated strategy configuration
#[derive(Debug, Clone)]
pub struct Backtester {
    config: StrategyConfig,
}

impl Backtester {
    pub fn new(config: StrategyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Backtester { config })
    }

    /// Run the simulation over `market`.
    ///
    /// Pure function of its inputs: identical bars and configuration always
    /// produce an identical ledger. An empty bar sequence yields an empty ledger.
    pub fn run(&self, market: MarketView<'_>) -> Result<BacktestResult, SimulationError> {
        let ema = self.ema_input(&market)?;
        let bars = market.bars;
        let cfg = &self.config;
        let stop_loss = cfg.stop_loss();

        let mut state = State::Flat;
        let mut balance = cfg.initial_balance;
        let mut events = Vec::new();

        for (i, bar) in bars.iter().enumerate() {
            let policy = ExitPolicy::resolve(cfg, bar.trend_score);
            let price = bar.close();

            if let State::Long(position) = &mut state {
                if policy.trailing() {
                    if let (Some(stop_pct), Some(stop)) = (stop_loss, position.stop_price) {
                        let candidate = price * (1.0 - stop_pct / 100.0);
                        position.stop_price = Some(stop.max(candidate));
                    }
                }
                if cfg.moving_target && policy.band_exit() && price > position.peak_price {
                    position.dynamic_target += price - position.peak_price;
                    position.peak_price = price;
                }
            }

            let stop_hit = matches!(
                &state,
                State::Long(p) if p.stop_price.is_some_and(|stop| price <= stop)
            );
            if stop_hit {
                if let State::Long(position) = std::mem::replace(&mut state, State::Flat) {
                    let event = self.close_position(&position, bar, &mut balance, None);
                    events.push(event);
                }
                continue;
            }

            if matches!(state, State::Flat) {
                let ema_value = ema.map(|column| column.values[i]);
                if let Some(target) = self.entry_target(bar, ema_value) {
                    let fee = balance * cfg.brokerage_fee_pct / 100.0;
                    let invested = balance - fee;
                    let position = Position {
                        entry_price: price,
                        entry_time: bar.timestamp(),
                        quantity: invested / price,
                        stop_price: stop_loss.map(|s| price * (1.0 - s / 100.0)),
                        dynamic_target: target,
                        peak_price: price,
                    };

                    debug!(
                        "{} BUY: Price={:.4}, Qty={:.6}, Target={:.4}, Stop={:?}, Score={:.2}",
                        bar.timestamp().format("%Y-%m-%d %H:%M"),
                        price,
                        position.quantity,
                        target,
                        position.stop_price,
                        bar.trend_score
                    );

                    events.push(TradeEvent {
                        timestamp: bar.timestamp(),
                        action: TradeAction::Buy,
                        price,
                        realized_pnl: 0.0,
                        balance_after: invested,
                        trend_score: bar.trend_score,
                        trend_status: bar.trend_status,
                        volume_buy: bar.volume_buy,
                        volume_sell: bar.volume_sell,
                    });
                    state = State::Long(position);
                }
            } else if policy.band_exit() {
                let target_hit = matches!(
                    &state,
                    State::Long(p) if self.exit_target(p, bar).is_some_and(|t| price >= t)
                );
                if target_hit {
                    if let State::Long(position) = std::mem::replace(&mut state, State::Flat) {
                        let event = self.close_position(
                            &position,
                            bar,
                            &mut balance,
                            Some(TradeAction::Sell),
                        );
                        events.push(event);
                    }
                }
            }
        }

        let open_position = match state {
            State::Long(position) => {
                debug!(
                    "Run ended LONG from {} at {:.4}; position left open",
                    position.entry_time.format("%Y-%m-%d %H:%M"),
                    position.entry_price
                );
                Some(position)
            }
            State::Flat => None,
        };

        let metrics =
            PerformanceMetrics::from_ledger(&events, cfg.initial_balance, cfg.brokerage_fee_pct);

        Ok(BacktestResult {
            config: cfg.clone(),
            events,
            initial_balance: cfg.initial_balance,
            final_balance: balance,
            open_position,
            metrics,
        })
    }

    /// Fail fast when the EMA filter is on but its column is absent or misaligned
    fn ema_input<'a>(
        &self,
        market: &MarketView<'a>,
    ) -> Result<Option<&'a EmaColumn>, SimulationError> {
        let Some(period) = self.config.ema_filter_period else {
            return Ok(None);
        };
        let column = market.ema.ok_or_else(|| {
            SimulationError::MissingInput(format!("EMA({}) filter requested but not computed", period))
        })?;
        if column.period != period {
            return Err(SimulationError::MissingInput(format!(
                "EMA({}) filter requested but EMA({}) supplied",
                period, column.period
            )));
        }
        if column.len() != market.bars.len() {
            return Err(SimulationError::MissingInput(format!(
                "EMA({}) has {} values for {} bars",
                period,
                column.len(),
                market.bars.len()
            )));
        }
        Ok(Some(column))
    }

    /// Projected target when every entry filter passes on this bar
    fn entry_target(&self, bar: &EnrichedBar, ema: Option<f64>) -> Option<f64> {
        let cfg = &self.config;
        let band = bar.band?;
        let price = bar.close();

        if price > band.lower * (1.0 + cfg.band_distance_pct / 100.0) {
            return None;
        }
        if ema.is_some_and(|value| price <= value) {
            return None;
        }
        if bar.trend_score < cfg.min_trend_score {
            return None;
        }
        if cfg.adaptive && bar.trend_score < ADAPTIVE_MIN_TREND_SCORE {
            return None;
        }

        let target = band.upper * (1.0 - cfg.band_distance_pct / 100.0);
        let gross_profit = target - price;
        let fees = (price + target) * cfg.brokerage_fee_pct / 100.0;
        let required_margin = price * cfg.min_profit_pct / 100.0;

        (gross_profit > fees + required_margin).then_some(target)
    }

    fn exit_target(&self, position: &Position, bar: &EnrichedBar) -> Option<f64> {
        if self.config.moving_target {
            Some(position.dynamic_target)
        } else {
            bar.band
                .map(|band| band.upper * (1.0 - self.config.band_distance_pct / 100.0))
        }
    }

    /// Close at the bar close. `action` of `None` means a stop exit, labelled
    /// by the sign of its pnl.
    fn close_position(
        &self,
        position: &Position,
        bar: &EnrichedBar,
        balance: &mut f64,
        action: Option<TradeAction>,
    ) -> TradeEvent {
        let price = bar.close();
        let gross = position.quantity * price;
        let fee = gross * self.config.brokerage_fee_pct / 100.0;
        let net = gross - fee;
        let pnl = net - position.quantity * position.entry_price;
        *balance = net;

        let action = action.unwrap_or(if pnl < 0.0 {
            TradeAction::StopLoss
        } else {
            TradeAction::TrailingStop
        });

        debug!(
            "{} {}: Price={:.4}, PnL={:.4}, Balance={:.4}",
            bar.timestamp().format("%Y-%m-%d %H:%M"),
            action,
            price,
            pnl,
            net
        );

        TradeEvent {
            timestamp: bar.timestamp(),
            action,
            price,
            realized_pnl: pnl,
            balance_after: net,
            trend_score: bar.trend_score,
            trend_status: bar.trend_status,
            volume_buy: bar.volume_buy,
            volume_sell: bar.volume_sell,
        }
    }
}
