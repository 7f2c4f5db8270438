//! Persistence for optimization results and historical bars
//!
//! SQLite-backed stores (WAL mode) plus an in-memory result store. Writes are
//! idempotent upserts on each record's natural key, so re-inserting a batch
//! after a partial failure never duplicates rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

use crate::error::StoreError;
use crate::metrics::ProfitFactor;
use crate::optimizer::sort_results;
use crate::types::{Bar, OptimizationResult};

/// Sink for optimizer results
pub trait ResultStore: Send {
    /// Upsert a batch atomically. Returns the number of rows written.
    fn insert_batch(&mut self, rows: &[OptimizationResult]) -> Result<usize, StoreError>;

    /// Rows of one run (or of every run) ordered by net profit, best first
    fn top_by_net_profit(
        &self,
        run: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OptimizationResult>, StoreError>;

    /// Timestamp of the most recent run, if any
    fn latest_run(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or(StoreError::InvalidTimestamp(ms))
}

fn create_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// =============================================================================
// SQLite result store
// =============================================================================

pub struct SqliteResultStore {
    conn: Connection,
}

impl SqliteResultStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        create_parent_dir(path)?;

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self::with_connection(conn)?;
        info!("Result store opened at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS optimization_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_timestamp INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                grid_index INTEGER NOT NULL,
                band_distance_pct REAL NOT NULL,
                stop_loss_pct REAL NOT NULL,
                min_trend_score REAL NOT NULL,
                ema_period INTEGER NOT NULL,
                min_profit_pct REAL NOT NULL,
                net_profit REAL NOT NULL,
                win_rate REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                profit_factor REAL NOT NULL,
                UNIQUE (run_timestamp, symbol, interval, band_distance_pct,
                        stop_loss_pct, min_trend_score, ema_period, min_profit_pct)
            );
            CREATE INDEX IF NOT EXISTS idx_results_profit
                ON optimization_results (run_timestamp, net_profit DESC);",
        )?;
        Ok(SqliteResultStore { conn })
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(i64, OptimizationResult)> {
        let ema: i64 = row.get("ema_period")?;
        let grid_index: i64 = row.get("grid_index")?;
        let trade_count: i64 = row.get("trade_count")?;
        let run_ms: i64 = row.get("run_timestamp")?;
        Ok((
            run_ms,
            OptimizationResult {
                run_timestamp: DateTime::<Utc>::UNIX_EPOCH,
                symbol: row.get("symbol")?,
                interval: row.get("interval")?,
                grid_index: grid_index as usize,
                band_distance_pct: row.get("band_distance_pct")?,
                stop_loss_pct: row.get("stop_loss_pct")?,
                min_trend_score: row.get("min_trend_score")?,
                ema_period: (ema > 0).then_some(ema as usize),
                min_profit_pct: row.get("min_profit_pct")?,
                net_profit: row.get("net_profit")?,
                win_rate: row.get("win_rate")?,
                trade_count: trade_count as usize,
                profit_factor: ProfitFactor::from_stored(row.get("profit_factor")?),
            },
        ))
    }
}

impl ResultStore for SqliteResultStore {
    fn insert_batch(&mut self, rows: &[OptimizationResult]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO optimization_results (
                    run_timestamp, symbol, interval, grid_index, band_distance_pct,
                    stop_loss_pct, min_trend_score, ema_period, min_profit_pct,
                    net_profit, win_rate, trade_count, profit_factor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT (run_timestamp, symbol, interval, band_distance_pct,
                             stop_loss_pct, min_trend_score, ema_period, min_profit_pct)
                DO UPDATE SET
                    grid_index = excluded.grid_index,
                    net_profit = excluded.net_profit,
                    win_rate = excluded.win_rate,
                    trade_count = excluded.trade_count,
                    profit_factor = excluded.profit_factor",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.run_timestamp.timestamp_millis(),
                    row.symbol,
                    row.interval,
                    row.grid_index as i64,
                    row.band_distance_pct,
                    row.stop_loss_pct,
                    row.min_trend_score,
                    row.ema_period.unwrap_or(0) as i64,
                    row.min_profit_pct,
                    row.net_profit,
                    row.win_rate,
                    row.trade_count as i64,
                    row.profit_factor.as_f64(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn top_by_net_profit(
        &self,
        run: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OptimizationResult>, StoreError> {
        let limit = limit as i64;
        let rows = match run {
            Some(ts) => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM optimization_results WHERE run_timestamp = ?1
                     ORDER BY net_profit DESC, grid_index ASC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![ts.timestamp_millis(), limit], Self::map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT * FROM optimization_results
                     ORDER BY net_profit DESC, run_timestamp DESC, grid_index ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], Self::map_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        rows.into_iter()
            .map(|(ms, mut result)| {
                result.run_timestamp = from_millis(ms)?;
                Ok(result)
            })
            .collect()
    }

    fn latest_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let ms: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(run_timestamp) FROM optimization_results",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        ms.map(from_millis).transpose()
    }
}

// =============================================================================
// In-memory result store
// =============================================================================

/// Result store kept in a `Vec`, with the same upsert semantics as SQLite
#[derive(Debug, Default, Clone)]
pub struct MemoryResultStore {
    rows: Vec<OptimizationResult>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[OptimizationResult] {
        &self.rows
    }

    fn same_key(a: &OptimizationResult, b: &OptimizationResult) -> bool {
        a.run_timestamp == b.run_timestamp
            && a.symbol == b.symbol
            && a.interval == b.interval
            && a.band_distance_pct == b.band_distance_pct
            && a.stop_loss_pct == b.stop_loss_pct
            && a.min_trend_score == b.min_trend_score
            && a.ema_period == b.ema_period
            && a.min_profit_pct == b.min_profit_pct
    }
}

impl ResultStore for MemoryResultStore {
    fn insert_batch(&mut self, rows: &[OptimizationResult]) -> Result<usize, StoreError> {
        for row in rows {
            match self.rows.iter_mut().find(|r| Self::same_key(r, row)) {
                Some(existing) => *existing = row.clone(),
                None => self.rows.push(row.clone()),
            }
        }
        Ok(rows.len())
    }

    fn top_by_net_profit(
        &self,
        run: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<OptimizationResult>, StoreError> {
        let mut rows: Vec<OptimizationResult> = self
            .rows
            .iter()
            .filter(|r| run.map_or(true, |ts| r.run_timestamp == ts))
            .cloned()
            .collect();
        sort_results(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }

    fn latest_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.rows.iter().map(|r| r.run_timestamp).max())
    }
}

// =============================================================================
// SQLite bar store
// =============================================================================

/// Keyed bar table addressable by symbol, interval and time range
pub struct SqliteBarStore {
    conn: Connection,
}

impl SqliteBarStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        create_parent_dir(path)?;

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (symbol, interval, timestamp)
            )",
            [],
        )?;
        Ok(SqliteBarStore { conn })
    }

    /// Insert or refresh bars keyed by `(symbol, interval, timestamp)`
    pub fn upsert_bars(
        &mut self,
        symbol: &str,
        interval: &str,
        bars: &[Bar],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO bars (symbol, interval, timestamp, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (symbol, interval, timestamp) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume",
            )?;
            for bar in bars {
                stmt.execute(params![
                    symbol,
                    interval,
                    bar.timestamp.timestamp_millis(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                ])?;
            }
        }
        tx.commit()?;
        Ok(bars.len())
    }

    /// Bars in `[start, end]` (both inclusive, either open), oldest first
    pub fn load_bars(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, StoreError> {
        let start_ms = start.map_or(i64::MIN, |t| t.timestamp_millis());
        let end_ms = end.map_or(i64::MAX, |t| t.timestamp_millis());

        let mut stmt = self.conn.prepare(
            "SELECT timestamp, open, high, low, close, volume FROM bars
             WHERE symbol = ?1 AND interval = ?2 AND timestamp >= ?3 AND timestamp <= ?4
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![symbol, interval, start_ms, end_ms], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, f64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(ms, open, high, low, close, volume)| {
                Ok(Bar::new_unchecked(from_millis(ms)?, open, high, low, close, volume))
            })
            .collect()
    }

    pub fn count(&self, symbol: &str, interval: &str) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bars WHERE symbol = ?1 AND interval = ?2",
            params![symbol, interval],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
