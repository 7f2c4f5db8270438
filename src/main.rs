//! Band reversion backtester - main entry point
//!
//! This binary provides four subcommands:
//! - backtest: Run one strategy configuration and export its ledger
//! - optimize: Run the parameter grid search
//! - top: Show the best stored optimization results
//! - import: Load a CSV file into the bar store

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "band-reversion")]
#[command(about = "Bollinger band mean-reversion backtester and grid optimizer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Symbol (overrides config file)
        #[arg(long)]
        symbol: Option<String>,

        /// Interval (overrides config file)
        #[arg(short, long)]
        interval: Option<String>,

        /// Initial balance
        #[arg(long)]
        balance: Option<f64>,

        /// Start date (YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        end: Option<String>,

        /// Enable adaptive exit mode
        #[arg(long)]
        adaptive: bool,
    },

    /// Optimize strategy parameters
    Optimize {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Grid preset (quick, full, or config)
        #[arg(short, long, default_value = "config")]
        mode: String,

        /// Number of top results to show
        #[arg(short, long)]
        top: Option<usize>,

        /// Worker threads (default: all cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Band distances to test (comma-separated). E.g., "-1,0,1"
        #[arg(long)]
        band_distance: Option<String>,

        /// Stop losses to test (comma-separated, 0 = no stop). E.g., "0,1.5,3"
        #[arg(long)]
        stop_loss: Option<String>,

        /// Minimum trend scores to test (comma-separated). E.g., "20,40"
        #[arg(long)]
        min_trend_score: Option<String>,

        /// EMA filter periods to test (comma-separated, 0 = no filter). E.g., "0,90,100"
        #[arg(long)]
        ema: Option<String>,

        /// Minimum profit margins to test (comma-separated). E.g., "0,0.2"
        #[arg(long)]
        min_profit: Option<String>,
    },

    /// Show best stored optimization results
    Top {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Number of rows
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Include every run instead of only the latest
        #[arg(long)]
        all: bool,
    },

    /// Import a CSV file into the bar store
    Import {
        /// CSV file with timestamp,open,high,low,close,volume
        #[arg(short, long)]
        file: PathBuf,

        /// Symbol the bars belong to
        #[arg(short, long)]
        symbol: String,

        /// Interval of the bars. E.g., "1h"
        #[arg(short, long)]
        interval: String,

        /// Bar store path (default: $BAND_REVERSION_BAR_STORE or data/bars.db)
        #[arg(long)]
        db: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Optimizer: keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Top { .. } => ("top", false),
        Commands::Import { .. } => ("import", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            symbol,
            interval,
            balance,
            start,
            end,
            adaptive,
        } => commands::backtest::run(commands::backtest::BacktestArgs {
            config_path: config,
            symbol,
            interval,
            balance,
            start,
            end,
            adaptive,
        }),

        Commands::Optimize {
            config,
            mode,
            top,
            workers,
            band_distance,
            stop_loss,
            min_trend_score,
            ema,
            min_profit,
        } => commands::optimize::run(commands::optimize::OptimizeArgs {
            config_path: config,
            mode,
            top,
            workers,
            band_distance,
            stop_loss,
            min_trend_score,
            ema,
            min_profit,
        }),

        Commands::Top { config, limit, all } => commands::top::run(config, limit, all),

        Commands::Import {
            file,
            symbol,
            interval,
            db,
        } => commands::import::run(file, symbol, interval, db),
    }
}
