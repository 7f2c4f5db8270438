//! Technical indicators
//!
//! Everything the simulation reads from a bar besides its prices:
//! - Bollinger envelope (rolling mean ± k population standard deviations)
//! - Exponential moving average for the entry trend filter, via the `ta` crate
//! - Trend score, a Wilder-smoothed relative-strength index in 0..=100
//! - Buy/sell volume split by candle direction
//!
//! All indicators are causal: the value at index `i` only depends on bars `0..=i`.

use statrs::statistics::Statistics;
use ta::indicators::ExponentialMovingAverage;
use ta::Next;

use crate::config::IndicatorConfig;
use crate::error::{ConfigError, IndicatorError};
use crate::types::{Band, Bar, EnrichedBar, TrendStatus};

/// Trend score used wherever there is no close-to-close history yet
pub const NEUTRAL_TREND_SCORE: f64 = 50.0;

// =============================================================================
// Bands
// =============================================================================

/// Rolling mean and population standard deviation bands.
///
/// Undefined (`None`) for the first `period - 1` bars.
pub fn compute_bands(closes: &[f64], period: usize, k: f64) -> Vec<Option<Band>> {
    if period == 0 {
        return vec![None; closes.len()];
    }

    (0..closes.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &closes[i + 1 - period..=i];
            let mean = window.mean();
            let std_dev = window.population_std_dev();
            Some(Band {
                mean,
                std_dev,
                upper: mean + k * std_dev,
                lower: mean - k * std_dev,
            })
        })
        .collect()
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Exponential moving average with smoothing factor `2 / (period + 1)`.
///
/// Seeded with the first value, so every index has a value.
pub fn compute_ema(values: &[f64], period: usize) -> Result<Vec<f64>, ConfigError> {
    let mut indicator = ExponentialMovingAverage::new(period).map_err(|_| {
        ConfigError::InvalidPeriod {
            name: "ema_period",
            value: period,
        }
    })?;

    Ok(values.iter().map(|&v| indicator.next(v)).collect())
}

/// EMA values for one period, aligned index-for-index with an enriched sequence
#[derive(Debug, Clone, PartialEq)]
pub struct EmaColumn {
    pub period: usize,
    pub values: Vec<f64>,
}

impl EmaColumn {
    pub fn compute(bars: &[EnrichedBar], period: usize) -> Result<Self, ConfigError> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
        Ok(EmaColumn {
            period,
            values: compute_ema(&closes, period)?,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// =============================================================================
// Momentum
// =============================================================================

/// Relative-strength trend score.
///
/// Gains and losses from close-to-close deltas are smoothed with
/// `alpha = 1 / period` (center of mass `period - 1`), seeded by the first
/// delta. The first bar has no delta and scores [`NEUTRAL_TREND_SCORE`].
/// A window with no losses scores 100. Scores are rounded to two decimals.
pub fn compute_trend_score(closes: &[f64], period: usize) -> Vec<f64> {
    let mut scores = Vec::with_capacity(closes.len());
    if closes.is_empty() {
        return scores;
    }
    scores.push(NEUTRAL_TREND_SCORE);
    if period == 0 {
        scores.resize(closes.len(), NEUTRAL_TREND_SCORE);
        return scores;
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain: Option<f64> = None;
    let mut avg_loss = 0.0;

    for pair in closes.windows(2) {
        let delta = pair[1] - pair[0];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        let (g, l) = match avg_gain {
            None => (gain, loss),
            Some(prev_gain) => (
                prev_gain + alpha * (gain - prev_gain),
                avg_loss + alpha * (loss - avg_loss),
            ),
        };
        avg_gain = Some(g);
        avg_loss = l;

        scores.push(round2(rsi_from_averages(g, l)));
    }

    scores
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Volume
// =============================================================================

/// Attribute a bar's full volume to buyers or sellers by candle direction.
///
/// Returns `(volume_buy, volume_sell)`; both are zero on an unchanged close.
pub fn split_volume(bar: &Bar) -> (f64, f64) {
    if bar.close > bar.open {
        (bar.volume, 0.0)
    } else if bar.close < bar.open {
        (0.0, bar.volume)
    } else {
        (0.0, 0.0)
    }
}

// =============================================================================
// Enrichment
// =============================================================================

/// Compute every per-bar indicator for an ordered bar sequence.
///
/// Timestamps must be strictly increasing.
pub fn enrich(bars: &[Bar], config: &IndicatorConfig) -> Result<Vec<EnrichedBar>, IndicatorError> {
    config.validate()?;

    if let Some(index) = bars
        .windows(2)
        .position(|w| w[1].timestamp <= w[0].timestamp)
    {
        return Err(IndicatorError::UnorderedBars { index: index + 1 });
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let bands = compute_bands(&closes, config.band_period, config.band_std);
    let scores = compute_trend_score(&closes, config.trend_period);

    Ok(bars
        .iter()
        .zip(bands)
        .zip(scores)
        .map(|((bar, band), trend_score)| {
            let (volume_buy, volume_sell) = split_volume(bar);
            EnrichedBar {
                bar: bar.clone(),
                band,
                volume_buy,
                volume_sell,
                trend_score,
                trend_status: TrendStatus::from_score(trend_score),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new_unchecked(start + Duration::hours(i as i64), c, c + 1.0, c - 1.0, c, 10.0)
            })
            .collect()
    }

    #[test]
    fn test_bands_warmup_and_values() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let bands = compute_bands(&closes, 3, 2.0);

        assert!(bands[0].is_none());
        assert!(bands[1].is_none());

        let band = bands[2].unwrap();
        assert_relative_eq!(band.mean, 2.0);
        // population std of [1, 2, 3]
        let sd = (2.0f64 / 3.0).sqrt();
        assert_relative_eq!(band.std_dev, sd, epsilon = 1e-12);
        assert_relative_eq!(band.upper, 2.0 + 2.0 * sd, epsilon = 1e-12);
        assert_relative_eq!(band.lower, 2.0 - 2.0 * sd, epsilon = 1e-12);

        assert_relative_eq!(bands[4].unwrap().mean, 4.0);
    }

    #[test]
    fn test_bands_collapse_on_constant_prices() {
        let closes = vec![100.0; 25];
        let bands = compute_bands(&closes, 20, 2.0);
        let band = bands[24].unwrap();
        assert_relative_eq!(band.upper, 100.0);
        assert_relative_eq!(band.lower, 100.0);
    }

    #[test]
    fn test_ema_seeded_with_first_value() {
        let values = [10.0, 11.0, 12.0];
        let ema = compute_ema(&values, 3).unwrap();
        assert_relative_eq!(ema[0], 10.0);
        assert_relative_eq!(ema[1], 10.5);
        assert_relative_eq!(ema[2], 11.25);
    }

    #[test]
    fn test_ema_rejects_zero_period() {
        assert!(compute_ema(&[1.0, 2.0], 0).is_err());
    }

    #[test]
    fn test_trend_score_neutral_first_bar() {
        let scores = compute_trend_score(&[100.0, 101.0], 14);
        assert_eq!(scores[0], NEUTRAL_TREND_SCORE);
        // no losses yet
        assert_eq!(scores[1], 100.0);
    }

    #[test]
    fn test_trend_score_flat_series_is_hundred() {
        let scores = compute_trend_score(&[100.0, 100.0, 100.0], 14);
        assert_eq!(scores, vec![50.0, 100.0, 100.0]);
    }

    #[test]
    fn test_trend_score_wilder_smoothing() {
        // deltas: +2, -1 with period 2 (alpha 0.5)
        // gain: 2 -> 1, loss: 0 -> 0.5, rs = 2, score = 66.67
        let scores = compute_trend_score(&[10.0, 12.0, 11.0], 2);
        assert_eq!(scores[2], 66.67);
    }

    #[test]
    fn test_trend_score_falling_series_is_zero() {
        let scores = compute_trend_score(&[10.0, 9.0, 8.0, 7.0], 14);
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn test_split_volume() {
        let ts = Utc::now();
        let up = Bar::new_unchecked(ts, 10.0, 12.0, 9.0, 11.0, 5.0);
        let down = Bar::new_unchecked(ts, 11.0, 12.0, 9.0, 10.0, 5.0);
        let flat = Bar::new_unchecked(ts, 10.0, 12.0, 9.0, 10.0, 5.0);
        assert_eq!(split_volume(&up), (5.0, 0.0));
        assert_eq!(split_volume(&down), (0.0, 5.0));
        assert_eq!(split_volume(&flat), (0.0, 0.0));
    }

    #[test]
    fn test_enrich_rejects_unordered_bars() {
        let mut bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        bars[2].timestamp = bars[1].timestamp;
        let err = enrich(&bars, &IndicatorConfig::default()).unwrap_err();
        assert_eq!(err, IndicatorError::UnorderedBars { index: 2 });
    }

    #[test]
    fn test_enrich_empty_is_empty() {
        let enriched = enrich(&[], &IndicatorConfig::default()).unwrap();
        assert!(enriched.is_empty());
    }

    #[test]
    fn test_enrich_populates_fields() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let enriched = enrich(&bars_from_closes(&closes), &IndicatorConfig::default()).unwrap();
        assert_eq!(enriched.len(), 30);
        assert!(enriched[18].band.is_none());
        assert!(enriched[19].band.is_some());
        assert_eq!(enriched[0].trend_score, NEUTRAL_TREND_SCORE);
        assert_eq!(enriched[0].trend_status, TrendStatus::Sideways);
        assert_eq!(enriched[29].trend_status, TrendStatus::StrongUp);
    }

    #[test]
    fn test_ema_column_aligns_with_bars() {
        let closes: Vec<f64> = (0..10).map(|i| 50.0 + i as f64).collect();
        let enriched = enrich(&bars_from_closes(&closes), &IndicatorConfig::default()).unwrap();
        let column = EmaColumn::compute(&enriched, 5).unwrap();
        assert_eq!(column.len(), enriched.len());
        assert_eq!(column.period, 5);
        assert_relative_eq!(column.values[0], 50.0);
    }
}
