//! Smoke tests for the band-reversion binary
//!
//! Run the compiled CLI against a scratch directory holding a small CSV and
//! config file.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

// =============================================================================
// Test Utilities
// =============================================================================

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_band-reversion"))
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("band_reversion_cli_{}_{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Chop around 100, a dip to 96 and a spike to 104: one round trip
fn write_bars(path: &PathBuf) {
    let mut closes: Vec<f64> = (0..24)
        .map(|i| if i % 2 == 0 { 99.0 } else { 101.0 })
        .collect();
    closes.extend([96.0, 104.0]);

    let mut csv = String::from("timestamp,open,high,low,close,volume\n");
    for (i, close) in closes.iter().enumerate() {
        let open = if i == 0 { *close } else { closes[i - 1] };
        csv.push_str(&format!(
            "{},{},{},{},{},100\n",
            1_704_067_200 + i as i64 * 3600,
            open,
            open.max(*close),
            open.min(*close),
            close
        ));
    }
    fs::write(path, csv).unwrap();
}

fn write_config(dir: &PathBuf) -> PathBuf {
    let config = serde_json::json!({
        "market": {
            "symbol": "BTCUSDT",
            "interval": "1h",
            "data_dir": dir.join("data"),
        },
        "strategy": {
            "band_distance_pct": 0.0,
            "stop_loss_pct": 1.5,
            "adaptive": false
        },
        "backtest": { "results_dir": dir.join("results") },
        "optimizer": { "results_db": dir.join("optimization.db") }
    });
    let path = dir.join("config.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

// =============================================================================
// Commands
// =============================================================================

#[test]
fn test_help_lists_subcommands() {
    let output = bin().arg("--help").output().unwrap();
    assert!(output.status.success());

    let text = stdout(&output);
    for command in ["backtest", "optimize", "top", "import"] {
        assert!(text.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_subcommand_help() {
    for command in ["backtest", "optimize", "top", "import"] {
        let output = bin().args([command, "--help"]).output().unwrap();
        assert!(output.status.success(), "{} --help failed", command);
    }
}

#[test]
fn test_backtest_writes_ledger_and_report() {
    let dir = scratch_dir("backtest");
    fs::create_dir_all(dir.join("data")).unwrap();
    write_bars(&dir.join("data").join("BTCUSDT_1h.csv"));
    let config = write_config(&dir);

    let output = bin()
        .current_dir(&dir)
        .args(["backtest", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "backtest failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = stdout(&output);
    assert!(report.contains("BACKTEST RESULTS: BTCUSDT 1h"));
    assert!(report.contains("Closed Trades:      1"));
    assert!(report.contains("Exit Mode:"));

    let ledger = fs::read_to_string(dir.join("results").join("backtest_BTCUSDT_1h.csv")).unwrap();
    assert_eq!(ledger.lines().count(), 3);
    assert!(dir.join("results").join("backtest_BTCUSDT_1h.json").exists());
    assert!(dir.join("logs").exists());
}

#[test]
fn test_import_then_top_on_empty_results() {
    let dir = scratch_dir("import");
    let csv = dir.join("bars.csv");
    write_bars(&csv);
    let db = dir.join("bars.db");

    let output = bin()
        .current_dir(&dir)
        .args(["import", "--symbol", "btcusdt", "--interval", "1h", "--file"])
        .arg(&csv)
        .arg("--db")
        .arg(&db)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("Imported 26 bars for BTCUSDT 1h"));

    let config = write_config(&dir);
    let output = bin()
        .current_dir(&dir)
        .args(["top", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("No optimization results stored"));
}
