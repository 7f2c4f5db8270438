//! Text reports and ledger export

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::backtest::{BacktestResult, ExitPolicy};
use crate::types::{OptimizationResult, TradeEvent};

/// Human-readable summary of one run
pub fn format_backtest_report(result: &BacktestResult, symbol: &str, interval: &str) -> String {
    let m = &result.metrics;
    let cfg = &result.config;
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", "=".repeat(60));
    let _ = writeln!(out, "BACKTEST RESULTS: {} {}", symbol, interval);
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "Band Distance:      {:.2}%", cfg.band_distance_pct);
    let _ = writeln!(
        out,
        "Stop Loss:          {}",
        cfg.stop_loss()
            .map_or("none".to_string(), |s| format!("{:.2}%", s))
    );
    let _ = writeln!(out, "Brokerage Fee:      {:.3}%", cfg.brokerage_fee_pct);
    let _ = writeln!(
        out,
        "EMA Filter:         {}",
        cfg.ema_filter_period
            .map_or("none".to_string(), |p| p.to_string())
    );
    let _ = writeln!(out, "Min Profit:         {:.2}%", cfg.min_profit_pct);
    let _ = writeln!(out, "Min Trend Score:    {:.0}", cfg.min_trend_score);
    let _ = writeln!(out, "Exit Mode:          {}", ExitPolicy::describe(cfg));
    let _ = writeln!(out, "{}", "-".repeat(60));
    let _ = writeln!(out, "Initial Balance:    {:.2}", result.initial_balance);
    let _ = writeln!(out, "Final Balance:      {:.2}", result.final_balance);
    let _ = writeln!(out, "Net Profit:         {:.2}", m.net_profit);
    let _ = writeln!(out, "Return:             {:.2}%", m.return_pct);
    let _ = writeln!(out, "Max Drawdown:       {:.2}%", m.max_drawdown_pct);
    let _ = writeln!(out, "Win Rate:           {:.2}%", m.win_rate * 100.0);
    let _ = writeln!(out, "Profit Factor:      {}", m.profit_factor);
    let _ = writeln!(out, "Closed Trades:      {}", m.closed_trades);
    let _ = writeln!(out, "Winning Trades:     {}", m.wins);
    let _ = writeln!(out, "Losing Trades:      {}", m.losses);
    let _ = writeln!(out, "Average Win:        {:.2}", m.avg_win);
    let _ = writeln!(out, "Average Loss:       {:.2}", m.avg_loss);
    let _ = writeln!(out, "Largest Win:        {:.2}", m.largest_win);
    let _ = writeln!(out, "Largest Loss:       {:.2}", m.largest_loss);
    let _ = writeln!(out, "{}", "-".repeat(60));
    let _ = writeln!(out, "Total Fees:         {:.2}", m.total_fees);

    if let Some(position) = &result.open_position {
        let _ = writeln!(out, "{}", "-".repeat(60));
        let _ = writeln!(
            out,
            "Open Position:      {:.6} @ {:.4} since {}",
            position.quantity,
            position.entry_price,
            position.entry_time.format("%Y-%m-%d %H:%M")
        );
    }
    let _ = writeln!(out, "{}", "=".repeat(60));
    out
}

/// Ranked optimization results as a table
pub fn format_top_results(rows: &[OptimizationResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", "=".repeat(100));
    let _ = writeln!(out, "TOP {} CONFIGURATIONS (by net profit)", rows.len());
    let _ = writeln!(out, "{}", "=".repeat(100));
    let _ = writeln!(
        out,
        "{:<4} {:>10} {:>7} {:>6} {:>10} | {:>6} {:>6} {:>6} {:>5} {:>7}",
        "Rank", "NetProfit", "WinR%", "Trades", "PF", "Dist%", "Stop%", "Score", "EMA", "MinPr%"
    );
    let _ = writeln!(out, "{}", "-".repeat(100));

    for (i, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:<4} {:>10.2} {:>7.2} {:>6} {:>10} | {:>6} {:>6} {:>6} {:>5} {:>7}",
            i + 1,
            row.net_profit,
            row.win_rate * 100.0,
            row.trade_count,
            row.profit_factor.to_string(),
            row.band_distance_pct,
            row.stop_loss_pct,
            row.min_trend_score,
            row.ema_period.map_or("-".to_string(), |p| p.to_string()),
            row.min_profit_pct
        );
    }
    let _ = writeln!(out, "{}", "=".repeat(100));
    out
}

#[derive(Serialize)]
struct LedgerRow<'a> {
    timestamp: String,
    action: &'a str,
    price: f64,
    realized_pnl: f64,
    balance_after: f64,
    trend_score: f64,
    trend_status: &'a str,
    volume_buy: f64,
    volume_sell: f64,
}

/// Write the ledger as CSV
pub fn write_ledger_csv(path: impl AsRef<Path>, events: &[TradeEvent]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for event in events {
        writer.serialize(LedgerRow {
            timestamp: event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            action: event.action.as_str(),
            price: event.price,
            realized_pnl: event.realized_pnl,
            balance_after: event.balance_after,
            trend_score: event.trend_score,
            trend_status: event.trend_status.as_str(),
            volume_buy: event.volume_buy,
            volume_sell: event.volume_sell,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the full result (ledger, open position, metrics) as JSON
pub fn write_result_json(path: impl AsRef<Path>, result: &BacktestResult) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, result).context("Failed to serialize backtest result")?;
    Ok(())
}

/// Write ledger CSV and result JSON under `results_dir`, returning both paths
pub fn export_backtest(
    results_dir: impl AsRef<Path>,
    symbol: &str,
    interval: &str,
    result: &BacktestResult,
) -> Result<(PathBuf, PathBuf)> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let stem = format!("backtest_{}_{}", symbol, interval);
    let csv_path = dir.join(format!("{}.csv", stem));
    let json_path = dir.join(format!("{}.json", stem));

    write_ledger_csv(&csv_path, &result.events)?;
    write_result_json(&json_path, result)?;
    Ok((csv_path, json_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::metrics::{PerformanceMetrics, ProfitFactor};
    use crate::types::{TradeAction, TrendStatus};
    use chrono::Utc;

    fn sample_result() -> BacktestResult {
        let events = vec![
            TradeEvent {
                timestamp: Utc::now(),
                action: TradeAction::Buy,
                price: 100.0,
                realized_pnl: 0.0,
                balance_after: 999.0,
                trend_score: 45.0,
                trend_status: TrendStatus::Sideways,
                volume_buy: 0.0,
                volume_sell: 12.5,
            },
            TradeEvent {
                timestamp: Utc::now(),
                action: TradeAction::TrailingStop,
                price: 110.0,
                realized_pnl: 97.9,
                balance_after: 1096.9,
                trend_score: 72.0,
                trend_status: TrendStatus::Up,
                volume_buy: 30.0,
                volume_sell: 0.0,
            },
        ];
        let metrics = PerformanceMetrics::from_ledger(&events, 1000.0, 0.1);
        BacktestResult {
            config: StrategyConfig {
                stop_loss_pct: Some(2.0),
                use_trailing_stop: true,
                ema_filter_period: Some(90),
                ..StrategyConfig::default()
            },
            events,
            initial_balance: 1000.0,
            final_balance: 1096.9,
            open_position: None,
            metrics,
        }
    }

    #[test]
    fn test_report_mentions_key_figures() {
        let report = format_backtest_report(&sample_result(), "BTCUSDT", "1h");
        assert!(report.contains("BTCUSDT 1h"));
        assert!(report.contains("Closed Trades:      1"));
        assert!(report.contains("Profit Factor:      unbounded"));
        assert!(report.contains("Stop Loss:          2.00%"));
        assert!(report.contains("EMA Filter:         90"));
        assert!(report.contains("Brokerage Fee:      0.100%"));
        assert!(report.contains("Exit Mode:          trailing stop and upper band target"));
    }

    #[test]
    fn test_export_writes_ledger() {
        let dir = std::env::temp_dir().join(format!("band_reversion_report_{}", std::process::id()));
        let (csv_path, json_path) = export_backtest(&dir, "BTCUSDT", "1h", &sample_result()).unwrap();

        let csv = fs::read_to_string(csv_path).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,action,price,realized_pnl,balance_after,trend_score,trend_status,volume_buy,volume_sell"
        );
        let buy = lines.next().unwrap();
        assert!(buy.contains(",BUY,"));
        assert!(buy.ends_with(",0.0,12.5"));
        let close = lines.next().unwrap();
        assert!(close.contains(",TRAILING_STOP,"));
        assert!(close.ends_with(",30.0,0.0"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(json["events"][1]["action"], "TRAILING_STOP");
        assert_eq!(json["metrics"]["profit_factor"], "Unbounded");
        assert_eq!(json["config"]["stop_loss_pct"], 2.0);
        assert_eq!(json["config"]["ema_filter_period"], 90);
        assert_eq!(json["events"][0]["volume_sell"], 12.5);
    }

    #[test]
    fn test_top_table_rows() {
        let row = OptimizationResult {
            run_timestamp: Utc::now(),
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            grid_index: 0,
            band_distance_pct: 1.0,
            stop_loss_pct: 2.0,
            min_trend_score: 30.0,
            ema_period: None,
            min_profit_pct: 0.1,
            net_profit: 42.0,
            win_rate: 0.75,
            trade_count: 4,
            profit_factor: ProfitFactor::Finite(3.0),
        };
        let table = format_top_results(&[row]);
        assert!(table.contains("TOP 1"));
        assert!(table.contains("42.00"));
        assert!(table.contains("75.00"));
    }
}
