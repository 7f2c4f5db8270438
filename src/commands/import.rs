//! Import a CSV file into the bar store

use anyhow::{Context, Result};
use band_reversion::config::ENV_BAR_STORE;
use band_reversion::store::SqliteBarStore;
use band_reversion::{data, Symbol};
use std::path::PathBuf;
use tracing::info;

const DEFAULT_BAR_STORE: &str = "data/bars.db";

pub fn run(file: PathBuf, symbol: String, interval: String, db: Option<String>) -> Result<()> {
    let db = db
        .or_else(|| std::env::var(ENV_BAR_STORE).ok())
        .unwrap_or_else(|| DEFAULT_BAR_STORE.to_string());
    let symbol = Symbol::new(symbol);

    let bars = data::load_csv(&file)?;
    info!("Read {} bars from {}", bars.len(), file.display());

    let mut store =
        SqliteBarStore::open(&db).with_context(|| format!("Failed to open bar store {}", db))?;
    let written = store.upsert_bars(symbol.as_str(), &interval, &bars)?;
    let total = store.count(symbol.as_str(), &interval)?;

    println!(
        "Imported {} bars for {} {} into {} ({} stored)",
        written, symbol, interval, db, total
    );
    Ok(())
}
