//! Data loading
//!
//! Reads OHLCV bars from CSV files or from the SQLite bar store and trims them
//! to the configured time range. Acquisition from exchanges happens elsewhere.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::MarketConfig;
use crate::store::SqliteBarStore;
use crate::types::{Bar, Symbol};

/// `{data_dir}/{SYMBOL}_{interval}.csv`
pub fn csv_path(data_dir: impl AsRef<Path>, symbol: &Symbol, interval: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol.as_str(), interval))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        // epoch seconds or milliseconds
        let ts = if ms.unsigned_abs() < 100_000_000_000 {
            DateTime::from_timestamp(ms, 0)
        } else {
            DateTime::from_timestamp_millis(ms)
        };
        return ts.with_context(|| format!("Timestamp out of range: {}", s));
    }
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

/// Load OHLCV bars from a CSV file.
///
/// Expects a header row and columns `timestamp,open,high,low,close,volume`.
/// Rows failing validation are skipped with a warning. The result is sorted
/// by timestamp with duplicate timestamps removed (first row wins).
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut bars = Vec::new();
    let mut invalid = 0usize;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let field = |i: usize, name: &str| -> Result<f64> {
            record
                .get(i)
                .with_context(|| format!("Missing {} column in row {}", name, row_idx + 1))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} in row {}", name, row_idx + 1))
        };

        let timestamp = parse_timestamp(record.get(0).context("Missing timestamp column")?)?;
        match Bar::new(
            timestamp,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        ) {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid += 1;
                warn!("Skipping row {} of {}: {}", row_idx + 1, path.display(), e);
            }
        }
    }

    let before = bars.len();
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() < before {
        warn!(
            "Dropped {} duplicate timestamps from {}",
            before - bars.len(),
            path.display()
        );
    }
    if invalid > 0 {
        warn!("{} invalid rows skipped in {}", invalid, path.display());
    }

    Ok(bars)
}

/// Keep bars within `[start, end]`, either bound optional
pub fn filter_range(
    bars: Vec<Bar>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Bar> {
    bars.into_iter()
        .filter(|b| start.map_or(true, |s| b.timestamp >= s))
        .filter(|b| end.map_or(true, |e| b.timestamp <= e))
        .collect()
}

/// Load the configured market: bar store when set, otherwise the CSV file
pub fn load_market(market: &MarketConfig) -> Result<Vec<Bar>> {
    let symbol = Symbol::new(&market.symbol);
    let (start, end) = market.time_range()?;
    let start = start.map(|t| t.and_utc());
    let end = end.map(|t| t.and_utc());

    let bars = match &market.bar_store {
        Some(db) => {
            let store = SqliteBarStore::open(db)
                .with_context(|| format!("Failed to open bar store {}", db))?;
            store
                .load_bars(symbol.as_str(), &market.interval, start, end)
                .with_context(|| format!("Failed to load {} {} bars", symbol, market.interval))?
        }
        None => {
            let path = csv_path(&market.data_dir, &symbol, &market.interval);
            let bars = load_csv(&path)
                .with_context(|| format!("Failed to load data for {}", symbol))?;
            filter_range(bars, start, end)
        }
    };

    info!(
        "Loaded {} bars for {} {}",
        bars.len(),
        symbol,
        market.interval
    );
    Ok(bars)
}
