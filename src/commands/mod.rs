//! Subcommand implementations

pub mod backtest;
pub mod import;
pub mod optimize;
pub mod top;

use anyhow::{Context, Result};
use band_reversion::Config;
use tracing::info;

/// Load a config file, apply environment overrides and validate it
pub fn load_config(path: &str) -> Result<Config> {
    let mut config = Config::from_file(path)?;
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path))?;
    info!("Loaded configuration from: {}", path);
    Ok(config)
}
