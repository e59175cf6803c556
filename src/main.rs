mod config;
mod database;
mod engine;
mod exchange;
mod indicators;
mod strategy;
mod types;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::RuntimeConfig;
use engine::{BacktestDriver, BotController, LiveDriver};
use exchange::BinanceFuturesClient;
use types::TradingPair;

#[derive(Parser)]
#[command(name = "rangebreak")]
#[command(version = "0.1.0")]
#[command(about = "Range-breakout pullback trading engine for crypto futures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the strategy over stored/downloaded history
    Backtest {
        /// Comma-separated symbols, e.g. BTCUSDT,ETHUSDT
        #[arg(short, long)]
        symbols: Option<String>,

        /// Number of days to look back
        #[arg(short, long, default_value = "7")]
        days: i64,
    },
    /// Trade a single symbol against the live feed
    Live {
        /// Symbol to trade
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Poll interval in milliseconds
        #[arg(short, long)]
        tick_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RuntimeConfig::load(&cli.config)?;
    if let Err(errors) = config.validate() {
        return Err(anyhow!("invalid configuration: {}", errors.join(", ")));
    }

    match cli.command {
        Commands::Backtest { symbols, days } => run_backtest(config, symbols, days).await,
        Commands::Live {
            symbol,
            tick_interval,
        } => run_live(config, symbol, tick_interval).await,
    }
}

fn parse_symbols(symbols: Option<String>) -> Result<Vec<TradingPair>> {
    match symbols {
        None => Ok(TradingPair::default_universe()),
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| TradingPair::from_str(s).ok_or_else(|| anyhow!("unknown symbol: {}", s)))
            .collect(),
    }
}

async fn run_backtest(config: RuntimeConfig, symbols: Option<String>, days: i64) -> Result<()> {
    if days <= 0 {
        return Err(anyhow!("days must be > 0"));
    }
    let pairs = parse_symbols(symbols)?;
    let end = Utc::now();
    let start = end - Duration::days(days);

    // A dead store is fatal; open positions cannot be reconciled without it.
    let db = Arc::new(database::Database::new(&config.general.db_path).await?);
    let feed = Arc::new(BinanceFuturesClient::from_env());

    let mut driver = BacktestDriver::new(config, pairs, start, end, feed, db);
    let report = driver.run().await?;
    report.print_summary();
    Ok(())
}

async fn run_live(
    mut config: RuntimeConfig,
    symbol: String,
    tick_interval: Option<u64>,
) -> Result<()> {
    let pair = TradingPair::from_str(&symbol).ok_or_else(|| anyhow!("unknown symbol: {}", symbol))?;
    if let Some(interval) = tick_interval {
        config.general.tick_interval_ms = interval;
    }

    let db = Arc::new(database::Database::new(&config.general.db_path).await?);
    let feed = Arc::new(BinanceFuturesClient::from_env());
    let controller = Arc::new(BotController::new_running());

    let signal_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal_controller.stop();
        }
    });

    let mut driver = LiveDriver::new(config, pair, feed, controller, Some(db));
    driver.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_default_to_three_majors() {
        let pairs = parse_symbols(None).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], TradingPair::BTCUSDT);
    }

    #[test]
    fn symbols_parse_comma_separated() {
        let pairs = parse_symbols(Some("btcusdt, ETHUSDT".to_string())).unwrap();
        assert_eq!(pairs, vec![TradingPair::BTCUSDT, TradingPair::ETHUSDT]);
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        assert!(parse_symbols(Some("DOGEUSDT".to_string())).is_err());
    }
}
