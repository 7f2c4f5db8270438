//! Backtest command implementation

use anyhow::{Context, Result};
use band_reversion::backtest::{Backtester, MarketView};
use band_reversion::indicators::{self, EmaColumn};
use band_reversion::{data, report};
use tracing::info;

use super::load_config;

pub struct BacktestArgs {
    pub config_path: String,
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub balance: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub adaptive: bool,
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(&args.config_path)?;

    if let Some(symbol) = args.symbol {
        config.market.symbol = symbol.to_uppercase();
    }
    if let Some(interval) = args.interval {
        config.market.interval = interval;
    }
    if let Some(balance) = args.balance {
        info!("Overriding initial balance to: {:.2}", balance);
        config.strategy.initial_balance = balance;
    }
    if args.start.is_some() {
        config.market.start = args.start;
    }
    if args.end.is_some() {
        config.market.end = args.end;
    }
    if args.adaptive {
        config.strategy.adaptive = true;
    }

    let backtester = Backtester::new(config.strategy.clone()).context("Invalid strategy")?;

    let bars = data::load_market(&config.market)?;
    let enriched = indicators::enrich(&bars, &config.indicators)?;

    let ema = config
        .strategy
        .ema_filter_period
        .map(|period| EmaColumn::compute(&enriched, period))
        .transpose()?;
    let mut market = MarketView::new(&enriched);
    if let Some(column) = &ema {
        market = market.with_ema(column);
    }

    info!("Running backtest over {} bars...", enriched.len());
    let result = backtester.run(market)?;

    print!(
        "{}",
        report::format_backtest_report(&result, &config.market.symbol, &config.market.interval)
    );

    let (csv_path, json_path) = report::export_backtest(
        &config.backtest.results_dir,
        &config.market.symbol,
        &config.market.interval,
        &result,
    )?;
    info!("Ledger written to {}", csv_path.display());
    info!("Result written to {}", json_path.display());

    info!("Backtest completed successfully");
    Ok(())
}
