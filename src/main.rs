mod analyzer;
mod config;
mod data;
mod engine;
mod exchange;
mod executor;
mod indicators;
mod risk;
mod signals;
mod strategies;
mod tracker;
mod types;

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use analyzer::MarketAnalyzer;
use config::Config;
use data::MarketDataCache;
use engine::{EngineOptions, TradingEngine};
use exchange::{BinanceExchange, Exchange};
use executor::OrderExecutor;
use indicators::IndicatorService;
use risk::{RiskManager, RiskParams};
use signals::SignalGenerator;
use strategies::MaCrossStrategy;
use tracker::PerformanceTracker;

#[derive(Parser)]
#[command(name = "momentum-trading-engine")]
#[command(version = "0.1.0")]
#[command(about = "Momentum trading engine for spot cryptocurrency markets", long_about = None)]
struct Cli {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Skip the daily blacklist rebuild for a faster start
    #[arg(long)]
    skip_blacklist: bool,

    /// Skip the hourly sector refresh for a faster start
    #[arg(long)]
    skip_sectors: bool,
}

fn build_exchanges(config: &Config) -> HashMap<String, Arc<dyn Exchange>> {
    let mut exchanges: HashMap<String, Arc<dyn Exchange>> = HashMap::new();

    for id in &config.exchanges {
        match id.as_str() {
            "binance" => {
                let credentials = config.api_keys.get(id).cloned().unwrap_or_default();
                let mut exchange =
                    BinanceExchange::new(credentials.api_key, credentials.secret_key);
                if config.test_mode {
                    exchange.set_sandbox_mode(true);
                }
                exchanges.insert(id.clone(), Arc::new(exchange));
            }
            other => warn!("Exchange {} has no adapter, skipping", other),
        }
    }

    exchanges
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Momentum trading engine v0.1.0");

    let config = Arc::new(Config::load(&cli.config)?);
    if config.dry_run {
        info!("Dry-run mode: orders are simulated, journals still written");
    }

    let exchanges = build_exchanges(&config);
    if exchanges.is_empty() {
        bail!("no usable exchanges configured");
    }
    let default_exchange = if config.default_exchange.is_empty() {
        exchanges.keys().next().cloned().expect("non-empty")
    } else {
        config.default_exchange.clone()
    };

    // Leaves first: the cache only needs the adapters, everything else
    // layers on top of it.
    let data = Arc::new(MarketDataCache::new(
        exchanges.clone(),
        default_exchange.clone(),
        config.quote_currencies.clone(),
        Duration::from_secs(config.data_refresh_interval),
    ));
    let indicators = Arc::new(IndicatorService::new(
        Arc::clone(&data),
        Duration::from_secs(config.data_refresh_interval),
    ));
    let analyzer = Arc::new(MarketAnalyzer::new(
        Arc::clone(&data),
        Arc::clone(&indicators),
        config.sectors.clone(),
        Duration::from_secs(config.market_state_refresh_interval),
        None,
        config.social_api_enabled,
    ));
    let signals = Arc::new(SignalGenerator::new(
        Arc::clone(&indicators),
        Arc::clone(&analyzer),
    ));
    let risk = Arc::new(RiskManager::new(
        RiskParams {
            max_risk_per_trade: config.max_risk_per_trade,
            max_total_risk: config.max_total_risk,
            max_sector_allocation: config.max_sector_allocation,
            account_balance: config.account_balance,
        },
        Arc::clone(&indicators),
        Arc::clone(&data),
    ));
    let executor = Arc::new(OrderExecutor::new(
        exchanges,
        default_exchange,
        config.dry_run,
        config.iceberg_threshold,
        config.min_order_amount,
        config.log_dir.clone(),
    )?);
    let tracker = Arc::new(PerformanceTracker::new(
        PathBuf::from("data"),
        config.account_balance,
    )?);

    // The MA cross demo runs beside the momentum core, sharing only the
    // executor and its journals.
    if config.is_strategy_enabled("ma_cross") {
        match MaCrossStrategy::from_config(&config, Arc::clone(&data), Arc::clone(&executor)) {
            Ok(strategy) => {
                info!("MA cross strategy enabled");
                tokio::spawn(strategy.run());
            }
            Err(e) => warn!("MA cross strategy not started: {}", e),
        }
    }

    let engine = Arc::new(TradingEngine::new(
        Arc::clone(&config),
        data,
        indicators,
        analyzer,
        signals,
        risk,
        executor,
        tracker,
        EngineOptions {
            skip_blacklist: cli.skip_blacklist,
            skip_sectors: cli.skip_sectors,
        },
    ));

    engine.run().await
}
