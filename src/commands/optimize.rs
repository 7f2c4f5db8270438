//! Optimize command implementation with progress tracking and Ctrl+C cancellation

use anyhow::{bail, Context, Result};
use band_reversion::grid::GridParams;
use band_reversion::optimizer::Optimizer;
use band_reversion::store::SqliteResultStore;
use band_reversion::{data, indicators, report};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::load_config;

pub struct OptimizeArgs {
    pub config_path: String,
    pub mode: String,
    pub top: Option<usize>,
    pub workers: Option<usize>,
    pub band_distance: Option<String>,
    pub stop_loss: Option<String>,
    pub min_trend_score: Option<String>,
    pub ema: Option<String>,
    pub min_profit: Option<String>,
}

/// Listen for Ctrl+C on a background runtime and raise `flag`
fn spawn_ctrl_c_listener(flag: Arc<AtomicBool>) -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl+C, cancelling remaining grid points...");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    Ok(runtime)
}

pub fn run(args: OptimizeArgs) -> Result<()> {
    info!("Starting optimization");

    let mut config = load_config(&args.config_path)?;

    match args.mode.as_str() {
        "quick" => config.optimizer.grid = GridParams::quick(),
        "full" => config.optimizer.grid = GridParams::full(),
        "config" => {}
        other => bail!("Unknown mode '{}', expected quick, full or config", other),
    }

    let overrides = [
        ("band_distance", &args.band_distance),
        ("stop_loss", &args.stop_loss),
        ("min_trend_score", &args.min_trend_score),
        ("ema", &args.ema),
        ("min_profit", &args.min_profit),
    ];
    for (name, values) in overrides {
        if let Some(values) = values {
            config
                .optimizer
                .grid
                .apply_override(&format!("{}={}", name, values))?;
        }
    }
    if let Some(top) = args.top {
        config.optimizer.top_n = top;
    }
    if args.workers.is_some() {
        config.optimizer.workers = args.workers;
    }

    let bars = data::load_market(&config.market)?;
    let enriched = indicators::enrich(&bars, &config.indicators)?;

    let total = config.optimizer.grid.total_combinations();
    info!("Optimization mode: {}", args.mode);
    info!("Parameter combinations: {}", total);

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Market:        {} {}", config.market.symbol, config.market.interval);
    println!("  Bars:          {}", enriched.len());
    println!("  Parameters:    {} combinations", total);
    println!("  Batch size:    {}", config.optimizer.batch_size);
    println!("  Results DB:    {}", config.optimizer.results_db);
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec}] ✓ {msg}",
            )?
            .progress_chars("█░ "),
    );
    pb.set_message("starting...");
    pb.tick();

    let cancel = Arc::new(AtomicBool::new(false));
    let _signal_runtime = spawn_ctrl_c_listener(cancel.clone())?;

    let mut store = SqliteResultStore::open(&config.optimizer.results_db)
        .with_context(|| format!("Failed to open {}", config.optimizer.results_db))?;

    let optimizer = Optimizer::new(
        config.strategy.clone(),
        config.optimizer.clone(),
        config.market.symbol.clone(),
        config.market.interval.clone(),
    )?
    .with_progress(pb.clone());

    let outcome = optimizer.run(&enriched, &mut store, &cancel)?;
    pb.finish_with_message(format!("{} valid", outcome.qualifying));
    println!();

    println!("  Evaluated:       {}", outcome.evaluated);
    println!("  Skipped invalid: {}", outcome.skipped_invalid);
    println!("  Qualifying:      {}", outcome.qualifying);
    println!("  Persisted rows:  {}", outcome.persisted_rows);
    if outcome.failed_batches > 0 {
        println!(
            "  ⚠ {} batches ({} rows) could not be stored: {}",
            outcome.failed_batches,
            outcome.failed_rows,
            outcome.last_store_error.as_deref().unwrap_or("unknown error")
        );
    }
    if outcome.cancelled {
        println!("  ⚠ Cancelled before the grid completed");
    }

    if outcome.top.is_empty() {
        info!("No configuration produced a closed trade.");
        println!("\nNo configuration produced a closed trade.");
        return Ok(());
    }
    print!("{}", report::format_top_results(&outcome.top));

    info!("Optimization completed successfully");
    Ok(())
}
