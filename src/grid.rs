//! Grid search parameters
//!
//! Five independent dimensions swept as a Cartesian product. Every other
//! strategy field comes from the base configuration.

use anyhow::{anyhow, bail, Result};
use itertools::iproduct;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::StrategyConfig;
use crate::error::ConfigError;

/// Grid search parameters for optimization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridParams {
    /// Band distances to test (percent)
    pub band_distances: Vec<f64>,
    /// Stop losses to test (percent, `0` disables the stop)
    pub stop_losses: Vec<f64>,
    /// Minimum trend scores to test
    pub min_trend_scores: Vec<f64>,
    /// EMA filter periods to test (`0` disables the filter)
    pub ema_periods: Vec<usize>,
    /// Minimum profit margins to test (percent)
    pub min_profits: Vec<f64>,
}

/// One combination of the grid, numbered in enumeration order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub index: usize,
    pub band_distance_pct: f64,
    pub stop_loss_pct: f64,
    pub min_trend_score: f64,
    pub ema_period: Option<usize>,
    pub min_profit_pct: f64,
}

impl GridPoint {
    /// Strategy configuration for this point on top of `base`
    pub fn apply(&self, base: &StrategyConfig) -> StrategyConfig {
        StrategyConfig {
            band_distance_pct: self.band_distance_pct,
            stop_loss_pct: Some(self.stop_loss_pct),
            min_trend_score: self.min_trend_score,
            ema_filter_period: self.ema_period,
            min_profit_pct: self.min_profit_pct,
            ..base.clone()
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "dist={} stop={} score={} ema={} profit={}",
            self.band_distance_pct,
            self.stop_loss_pct,
            self.min_trend_score,
            self.ema_period.map_or("none".to_string(), |p| p.to_string()),
            self.min_profit_pct
        )
    }
}

impl GridParams {
    /// Quick grid for smoke runs
    pub fn quick() -> Self {
        GridParams {
            band_distances: vec![0.0, 1.0],
            stop_losses: vec![0.0, 2.0],
            min_trend_scores: vec![30.0],
            ema_periods: vec![0, 100],
            min_profits: vec![0.0, 0.2],
        }
    }

    /// Full production sweep
    pub fn full() -> Self {
        GridParams {
            band_distances: vec![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            stop_losses: vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0],
            min_trend_scores: vec![20.0, 30.0, 40.0, 50.0, 60.0],
            ema_periods: vec![70, 80, 90, 100, 110],
            min_profits: vec![0.0, 0.1, 0.2, 0.3],
        }
    }

    /// Single-point grid reproducing `config`'s own parameters
    pub fn single(config: &StrategyConfig) -> Self {
        GridParams {
            band_distances: vec![config.band_distance_pct],
            stop_losses: vec![config.stop_loss_pct.unwrap_or(0.0)],
            min_trend_scores: vec![config.min_trend_score],
            ema_periods: vec![config.ema_filter_period.unwrap_or(0)],
            min_profits: vec![config.min_profit_pct],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let dims = [
            ("band_distances", self.band_distances.is_empty()),
            ("stop_losses", self.stop_losses.is_empty()),
            ("min_trend_scores", self.min_trend_scores.is_empty()),
            ("ema_periods", self.ema_periods.is_empty()),
            ("min_profits", self.min_profits.is_empty()),
        ];
        match dims.iter().find(|(_, empty)| *empty) {
            Some((name, _)) => Err(ConfigError::EmptyGridDimension(*name)),
            None => Ok(()),
        }
    }

    /// Get total number of parameter combinations
    pub fn total_combinations(&self) -> usize {
        self.band_distances.len()
            * self.stop_losses.len()
            * self.min_trend_scores.len()
            * self.ema_periods.len()
            * self.min_profits.len()
    }

    /// Generate all parameter combinations using itertools
    pub fn points(&self) -> Vec<GridPoint> {
        iproduct!(
            &self.band_distances,
            &self.stop_losses,
            &self.min_trend_scores,
            &self.ema_periods,
            &self.min_profits
        )
        .enumerate()
        .map(|(index, (&dist, &stop, &score, &ema, &profit))| GridPoint {
            index,
            band_distance_pct: dist,
            stop_loss_pct: stop,
            min_trend_score: score,
            ema_period: (ema > 0).then_some(ema),
            min_profit_pct: profit,
        })
        .collect()
    }

    /// Distinct enabled EMA periods, ascending
    pub fn ema_periods_enabled(&self) -> Vec<usize> {
        let mut periods: Vec<usize> = self.ema_periods.iter().copied().filter(|p| *p > 0).collect();
        periods.sort_unstable();
        periods.dedup();
        periods
    }

    /// Apply a CLI override of the form `name=v1,v2,v3`
    pub fn apply_override(&mut self, s: &str) -> Result<()> {
        let (key, values) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid grid override '{}', expected name=v1,v2", s))?;

        match key.trim() {
            "band_distance" | "band_distances" => self.band_distances = parse_list(values)?,
            "stop_loss" | "stop_losses" => self.stop_losses = parse_list(values)?,
            "min_trend_score" | "min_trend_scores" => self.min_trend_scores = parse_list(values)?,
            "ema" | "ema_periods" => self.ema_periods = parse_list(values)?,
            "min_profit" | "min_profits" => self.min_profits = parse_list(values)?,
            other => bail!("Unknown grid parameter '{}'", other),
        }
        Ok(())
    }
}

impl Default for GridParams {
    fn default() -> Self {
        GridParams::full()
    }
}

/// Parse a comma separated list, e.g. `"0,0.5,1"`
pub fn parse_list<T: FromStr>(s: &str) -> Result<Vec<T>> {
    let values = s
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| anyhow!("Invalid grid value '{}'", v))
        })
        .collect::<Result<Vec<T>>>()?;

    if values.is_empty() {
        bail!("Empty grid value list '{}'", s);
    }
    Ok(values)
}
