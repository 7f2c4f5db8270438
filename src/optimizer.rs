//! Parallel grid search
//!
//! Every grid point runs the backtester against one shared, immutable
//! enriched bar sequence on a fixed-size rayon pool. EMA columns are computed
//! once per distinct period before the pool starts. Qualifying results are
//! funnelled through a channel to a single writer thread that batches them
//! into the result store and keeps a bounded top-N ranking.

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backtest::{Backtester, MarketView};
use crate::config::{OptimizerSettings, StrategyConfig};
use crate::error::{OptimizerError, StoreError};
use crate::grid::GridPoint;
use crate::indicators::EmaColumn;
use crate::store::ResultStore;
use crate::types::{EnrichedBar, OptimizationResult};

/// Summary of a grid search
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub run_timestamp: DateTime<Utc>,
    pub total_points: usize,
    /// Points that ran to completion
    pub evaluated: usize,
    /// Points rejected by configuration validation
    pub skipped_invalid: usize,
    /// Evaluated points with at least one closed trade
    pub qualifying: usize,
    pub persisted_rows: usize,
    pub failed_batches: usize,
    pub failed_rows: usize,
    pub cancelled: bool,
    pub last_store_error: Option<String>,
    /// Best results by net profit, ties broken by grid index
    pub top: Vec<OptimizationResult>,
}

/// EMA columns keyed by period, shared read-only by all workers
#[derive(Debug, Default)]
pub struct EmaCache {
    columns: HashMap<usize, EmaColumn>,
}

impl EmaCache {
    pub fn build(bars: &[EnrichedBar], periods: &[usize]) -> Result<Self, OptimizerError> {
        let mut columns = HashMap::with_capacity(periods.len());
        for &period in periods {
            if !columns.contains_key(&period) {
                columns.insert(period, EmaColumn::compute(bars, period)?);
            }
        }
        Ok(EmaCache { columns })
    }

    pub fn get(&self, period: usize) -> Option<&EmaColumn> {
        self.columns.get(&period)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Grid search over one symbol and interval
pub struct Optimizer {
    base: StrategyConfig,
    settings: OptimizerSettings,
    symbol: String,
    interval: String,
    run_timestamp: Option<DateTime<Utc>>,
    progress: Option<ProgressBar>,
}

impl Optimizer {
    pub fn new(
        base: StrategyConfig,
        settings: OptimizerSettings,
        symbol: impl Into<String>,
        interval: impl Into<String>,
    ) -> Result<Self, OptimizerError> {
        settings.validate()?;
        Ok(Optimizer {
            base,
            settings,
            symbol: symbol.into(),
            interval: interval.into(),
            run_timestamp: None,
            progress: None,
        })
    }

    /// Fix the run timestamp instead of taking the wall clock at start
    pub fn with_run_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.run_timestamp = Some(ts);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every grid point against `bars`.
    ///
    /// `cancel` is checked before each grid point. Batches flushed before a
    /// cancellation stay in the store; results still buffered are flushed on
    /// the way out.
    pub fn run<S: ResultStore>(
        &self,
        bars: &[EnrichedBar],
        store: &mut S,
        cancel: &AtomicBool,
    ) -> Result<OptimizationReport, OptimizerError> {
        let run_timestamp = self.run_timestamp.unwrap_or_else(Utc::now);
        let points = self.settings.grid.points();
        let total_points = points.len();

        let ema_cache = EmaCache::build(bars, &self.settings.grid.ema_periods_enabled())?;

        let mut pool = rayon::ThreadPoolBuilder::new();
        if let Some(workers) = self.settings.workers {
            pool = pool.num_threads(workers);
        }
        let pool = pool.build()?;

        info!(
            "Optimizing {} {}: {} grid points, {} bars, {} EMA periods, {} workers",
            self.symbol,
            self.interval,
            total_points,
            bars.len(),
            ema_cache.len(),
            pool.current_num_threads()
        );

        let evaluated = AtomicUsize::new(0);
        let skipped_invalid = AtomicUsize::new(0);
        let (tx, rx) = mpsc::sync_channel::<OptimizationResult>(self.settings.batch_size * 2);

        let outcome = thread::scope(|scope| {
            let writer = scope.spawn(|| self.write_results(rx, store, cancel));

            pool.install(|| {
                points.par_iter().for_each_with(tx, |tx, point| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let row = self.evaluate(
                        point,
                        bars,
                        &ema_cache,
                        run_timestamp,
                        &evaluated,
                        &skipped_invalid,
                    );
                    if let Some(progress) = &self.progress {
                        progress.inc(1);
                    }
                    if let Some(row) = row {
                        // Receiver only hangs up if the writer died
                        let _ = tx.send(row);
                    }
                });
            });

            writer.join().map_err(|_| OptimizerError::WriterPanicked)
        })?;

        let cancelled = cancel.load(Ordering::Relaxed);
        let report = OptimizationReport {
            run_timestamp,
            total_points,
            evaluated: evaluated.load(Ordering::Relaxed),
            skipped_invalid: skipped_invalid.load(Ordering::Relaxed),
            qualifying: outcome.qualifying,
            persisted_rows: outcome.persisted_rows,
            failed_batches: outcome.failed_batches,
            failed_rows: outcome.failed_rows,
            cancelled,
            last_store_error: outcome.last_error,
            top: outcome.top,
        };

        if cancelled {
            warn!(
                "Optimization cancelled after {} of {} grid points",
                report.evaluated + report.skipped_invalid,
                total_points
            );
        }
        info!(
            "Optimization finished: {} evaluated, {} qualifying, {} persisted, {} failed batches",
            report.evaluated, report.qualifying, report.persisted_rows, report.failed_batches
        );

        Ok(report)
    }

    fn evaluate(
        &self,
        point: &GridPoint,
        bars: &[EnrichedBar],
        ema_cache: &EmaCache,
        run_timestamp: DateTime<Utc>,
        evaluated: &AtomicUsize,
        skipped_invalid: &AtomicUsize,
    ) -> Option<OptimizationResult> {
        let backtester = match Backtester::new(point.apply(&self.base)) {
            Ok(b) => b,
            Err(e) => {
                warn!("Skipping grid point {} ({}): {}", point.index, point.describe(), e);
                skipped_invalid.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let mut market = MarketView::new(bars);
        if let Some(column) = point.ema_period.and_then(|p| ema_cache.get(p)) {
            market = market.with_ema(column);
        }

        let result = match backtester.run(market) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping grid point {} ({}): {}", point.index, point.describe(), e);
                skipped_invalid.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        evaluated.fetch_add(1, Ordering::Relaxed);

        let metrics = &result.metrics;
        if metrics.closed_trades == 0 {
            return None;
        }

        Some(OptimizationResult {
            run_timestamp,
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            grid_index: point.index,
            band_distance_pct: point.band_distance_pct,
            stop_loss_pct: point.stop_loss_pct,
            min_trend_score: point.min_trend_score,
            ema_period: point.ema_period,
            min_profit_pct: point.min_profit_pct,
            net_profit: metrics.net_profit,
            win_rate: metrics.win_rate,
            trade_count: metrics.closed_trades,
            profit_factor: metrics.profit_factor,
        })
    }

    /// Single writer: batches rows into the store and ranks them
    fn write_results<S: ResultStore>(
        &self,
        rx: Receiver<OptimizationResult>,
        store: &mut S,
        cancel: &AtomicBool,
    ) -> WriterOutcome {
        let mut outcome = WriterOutcome::default();
        let mut top = TopN::new(self.settings.top_n);
        let mut buffer = Vec::with_capacity(self.settings.batch_size);

        for row in rx {
            outcome.qualifying += 1;
            if let Some(progress) = &self.progress {
                progress.set_message(format!("{} valid", outcome.qualifying));
            }
            top.offer(&row);
            buffer.push(row);
            if buffer.len() >= self.settings.batch_size {
                self.flush(store, &mut buffer, &mut outcome, cancel);
            }
        }
        if !buffer.is_empty() {
            self.flush(store, &mut buffer, &mut outcome, cancel);
        }

        outcome.top = top.into_sorted_vec();
        outcome
    }

    /// Write one batch, retrying it intact with exponential backoff
    fn flush<S: ResultStore>(
        &self,
        store: &mut S,
        buffer: &mut Vec<OptimizationResult>,
        outcome: &mut WriterOutcome,
        cancel: &AtomicBool,
    ) {
        let attempts = self.settings.store_attempts;
        let mut backoff = Duration::from_millis(self.settings.retry_backoff_ms);

        for attempt in 1..=attempts {
            match store.insert_batch(buffer) {
                Ok(written) => {
                    outcome.persisted_rows += written;
                    buffer.clear();
                    return;
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Batch of {} rows failed (attempt {}/{}): {}. Retrying in {:?}",
                        buffer.len(),
                        attempt,
                        attempts,
                        e,
                        backoff
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(e) => {
                    let failure = StoreError::RetriesExhausted {
                        rows: buffer.len(),
                        attempts,
                        message: e.to_string(),
                    };
                    error!("{}", failure);
                    outcome.failed_batches += 1;
                    outcome.failed_rows += buffer.len();
                    outcome.last_error = Some(failure.to_string());
                    if self.settings.halt_on_store_error {
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        buffer.clear();
    }
}

#[derive(Debug, Default)]
struct WriterOutcome {
    qualifying: usize,
    persisted_rows: usize,
    failed_batches: usize,
    failed_rows: usize,
    last_error: Option<String>,
    top: Vec<OptimizationResult>,
}

/// Higher is better: net profit first, then the earlier grid index
type RankKey = (OrderedFloat<f64>, Reverse<usize>);

fn rank_key(row: &OptimizationResult) -> RankKey {
    (OrderedFloat(row.net_profit), Reverse(row.grid_index))
}

struct Ranked {
    key: RankKey,
    row: OptimizationResult,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.key.cmp(&other.key)
    }
}

/// Bounded min-heap holding the `n` best rows seen so far
struct TopN {
    n: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
}

impl TopN {
    fn new(n: usize) -> Self {
        TopN {
            n,
            heap: BinaryHeap::with_capacity(n + 1),
        }
    }

    fn offer(&mut self, row: &OptimizationResult) {
        if self.n == 0 {
            return;
        }
        let key = rank_key(row);
        if self.heap.len() < self.n {
            self.heap.push(Reverse(Ranked {
                key,
                row: row.clone(),
            }));
        } else if self.heap.peek().is_some_and(|worst| key > worst.0.key) {
            self.heap.pop();
            self.heap.push(Reverse(Ranked {
                key,
                row: row.clone(),
            }));
        }
    }

    fn into_sorted_vec(self) -> Vec<OptimizationResult> {
        // ascending order of Reverse is best first
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(ranked)| ranked.row)
            .collect()
    }
}

/// Sort results best first, matching the writer's ranking
pub fn sort_results(results: &mut [OptimizationResult]) {
    results.sort_by(|a, b| rank_key(b).cmp(&rank_key(a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ProfitFactor;

    fn row(index: usize, net_profit: f64) -> OptimizationResult {
        OptimizationResult {
            run_timestamp: Utc::now(),
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            grid_index: index,
            band_distance_pct: 0.0,
            stop_loss_pct: 0.0,
            min_trend_score: 0.0,
            ema_period: None,
            min_profit_pct: 0.0,
            net_profit,
            win_rate: 1.0,
            trade_count: 1,
            profit_factor: ProfitFactor::Unbounded,
        }
    }

    #[test]
    fn test_top_n_keeps_best() {
        let mut top = TopN::new(2);
        for (i, p) in [5.0, 50.0, -3.0, 20.0, 50.0].iter().enumerate() {
            top.offer(&row(i, *p));
        }
        let best = top.into_sorted_vec();
        assert_eq!(best.len(), 2);
        // tie on 50.0 goes to the earlier index
        assert_eq!(best[0].grid_index, 1);
        assert_eq!(best[1].grid_index, 4);
    }

    #[test]
    fn test_top_n_zero_is_empty() {
        let mut top = TopN::new(0);
        top.offer(&row(0, 1.0));
        assert!(top.into_sorted_vec().is_empty());
    }

    #[test]
    fn test_sort_results_matches_ranking() {
        let mut rows = vec![row(2, 10.0), row(0, 10.0), row(1, 30.0)];
        sort_results(&mut rows);
        let order: Vec<usize> = rows.iter().map(|r| r.grid_index).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_ema_cache_dedups_periods() {
        let cache = EmaCache::build(&[], &[70, 70, 90]).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get(70).is_some());
        assert!(cache.get(80).is_none());
    }
}
