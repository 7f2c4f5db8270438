//! Show best stored optimization results

use anyhow::{Context, Result};
use band_reversion::report;
use band_reversion::store::{ResultStore, SqliteResultStore};
use tracing::info;

use super::load_config;

pub fn run(config_path: String, limit: usize, all: bool) -> Result<()> {
    let config = load_config(&config_path)?;
    let store = SqliteResultStore::open(&config.optimizer.results_db)
        .with_context(|| format!("Failed to open {}", config.optimizer.results_db))?;

    let run = if all { None } else { store.latest_run()? };
    if !all && run.is_none() {
        println!("No optimization results stored in {}", config.optimizer.results_db);
        return Ok(());
    }
    if let Some(ts) = run {
        info!("Showing run from {}", ts.format("%Y-%m-%d %H:%M:%S"));
    }

    let rows = store.top_by_net_profit(run, limit)?;
    print!("{}", report::format_top_results(&rows));
    Ok(())
}
