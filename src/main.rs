//! Operator CLI for the trading bot.
//!
//! Modes: `scan` (read-only listing), `track` (periodic price polling with
//! alerts), `portfolio` (summary), `arbitrage` (one-shot scan), `trade`
//! (the full loop). Exit code 0 on success, non-zero on fatal errors.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use polybot::config::Config;
use polybot::gateway::{Exchange, ExchangeGateway, MarketFetcher, OddsClient};
use polybot::models::Market;
use polybot::orders::OrderEngine;
use polybot::portfolio::Portfolio;
use polybot::risk::RiskManager;
use polybot::store::Store;
use polybot::strategy::{Arbitrage, Strategy, StrategyContext, StrategyEngine};
use polybot::trader::{AutoTradeConfig, AutoTrader};

#[derive(Parser)]
#[command(name = "polybot", about = "Automated prediction-market trading bot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List markets matching the configured filters (read-only)
    Scan {
        /// Search by keyword instead of listing the default categories
        #[arg(long)]
        query: Option<String>,
    },
    /// Poll prices periodically, persist snapshots and alert on big moves
    Track {
        /// Seconds between polls
        #[arg(long, default_value_t = 60)]
        interval: u64,
        /// How many top-volume markets to track
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Show the saved portfolio with refreshed prices
    Portfolio,
    /// One-shot arbitrage scan against live orderbooks
    Arbitrage,
    /// Run the full trading loop
    Trade {
        /// conservative | balanced | aggressive | scalper | sports_tonight
        #[arg(long, default_value = "balanced")]
        preset: String,
        /// Starting bankroll in USD
        #[arg(long)]
        bankroll: Option<f64>,
        /// Stop after this many cycles (default: run until interrupted)
        #[arg(long)]
        cycles: Option<u64>,
        /// Preview only: report opportunities without placing orders
        #[arg(long)]
        scan_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    for issue in config.validate() {
        warn!("config: {issue}");
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Scan { query } => mode_scan(&config, query.as_deref()).await,
        Command::Track { interval, top } => mode_track(&config, interval, top).await,
        Command::Portfolio => mode_portfolio(&config).await,
        Command::Arbitrage => mode_arbitrage(&config).await,
        Command::Trade {
            preset,
            bankroll,
            cycles,
            scan_only,
        } => mode_trade(&config, &preset, bankroll, cycles, scan_only).await,
    }
}

async fn mode_scan(config: &Config, query: Option<&str>) -> Result<()> {
    let gateway = ExchangeGateway::new(config);
    let fetcher = MarketFetcher::new(&config.gamma_host, gateway.limiter());
    let categories = vec!["crypto".to_string(), "sports".to_string()];
    let mut markets = match query {
        Some(query) => fetcher.search(query, 20).await,
        None => {
            fetcher
                .all_target_markets(&categories, 100, Some(config.trading.min_market_liquidity))
                .await
        }
    };
    if markets.is_empty() {
        warn!("no markets found matching criteria");
        return Ok(());
    }
    markets.sort_by(|a, b| {
        b.volume
            .partial_cmp(&a.volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    info!("found {} markets", markets.len());
    if query.is_some() {
        for market in markets.iter().take(20) {
            info!(
                "  {} | YES {:.2} | vol ${:.0} | liq ${:.0}",
                market.question, market.price_yes, market.volume, market.liquidity
            );
        }
        return Ok(());
    }
    for category in ["crypto", "sports"] {
        let subset: Vec<&Market> = markets
            .iter()
            .filter(|m| m.category.to_lowercase().contains(category))
            .collect();
        info!("{category} markets ({}):", subset.len());
        for market in subset.iter().take(10) {
            info!(
                "  {} | YES {:.2} | vol ${:.0} | liq ${:.0}",
                market.question, market.price_yes, market.volume, market.liquidity
            );
        }
    }
    Ok(())
}

async fn mode_track(config: &Config, interval: u64, top: usize) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let gateway = Arc::new(ExchangeGateway::new(config));
    let fetcher = MarketFetcher::new(&config.gamma_host, gateway.limiter());
    let categories = vec!["crypto".to_string(), "sports".to_string()];

    let mut markets = fetcher
        .all_target_markets(&categories, 100, Some(config.trading.min_market_liquidity))
        .await;
    markets.sort_by(|a, b| {
        b.volume
            .partial_cmp(&a.volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    markets.truncate(top);
    if markets.is_empty() {
        warn!("no markets to track");
        return Ok(());
    }

    info!(
        "tracking {} markets every {interval}s (ctrl-c to stop)",
        markets.len()
    );
    let mut last_price: HashMap<String, f64> = HashMap::new();

    loop {
        for market in &markets {
            let Some(mid) = gateway.get_midpoint(&market.token_id_yes).await else {
                continue;
            };
            let snapshot = polybot::models::PriceSnapshot {
                token_id: market.token_id_yes.clone(),
                timestamp: chrono::Utc::now(),
                price_yes: mid,
                price_no: 1.0 - mid,
                best_bid: None,
                best_ask: None,
            };
            if let Err(e) = store.save_price_snapshot(&snapshot).await {
                warn!("snapshot write failed: {e}");
            }

            if let Some(prev) = last_price.get(&market.token_id_yes) {
                let change = mid - prev;
                if change.abs() >= config.alerts.price_change_threshold {
                    info!(
                        "ALERT {:+.1}%: {} now {:.2}",
                        change * 100.0,
                        market.question,
                        mid
                    );
                }
            }
            last_price.insert(market.token_id_yes.clone(), mid);
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(interval)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("tracker stopped");
                return Ok(());
            }
        }
    }
}

async fn mode_portfolio(config: &Config) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let gateway = Arc::new(ExchangeGateway::new(config));
    let portfolio = Portfolio::load(store.clone()).await?;

    portfolio.update_prices(gateway.as_ref()).await.ok();
    portfolio.log_summary(&config.trading).await;

    let stats = store.stats().await?;
    info!(
        "store: {} trades | {} snapshots | {} pending orders | {} active triggers",
        stats.trades, stats.snapshots, stats.pending_orders, stats.active_auto_orders
    );
    if gateway.has_auth() {
        info!("open exchange orders: {}", gateway.open_orders().await.len());
    }
    Ok(())
}

async fn mode_arbitrage(config: &Config) -> Result<()> {
    let store = Store::open(&config.db_path)?;
    let gateway = Arc::new(ExchangeGateway::new(config));
    let fetcher = MarketFetcher::new(&config.gamma_host, gateway.limiter());
    let gateway: Arc<dyn Exchange> = gateway;
    let categories = vec!["crypto".to_string(), "sports".to_string()];
    let markets = fetcher
        .all_target_markets(&categories, 100, Some(config.trading.min_market_liquidity))
        .await;
    info!("checking {} markets for arbitrage...", markets.len());

    let ctx = StrategyContext {
        store,
        exchange: gateway,
        odds: None,
    };
    let signals = Arbitrage::default().scan(&ctx, &markets).await?;
    if signals.is_empty() {
        info!("no arbitrage opportunities right now");
    }
    for signal in signals {
        info!(
            "{} | profit {:.2}% | {}",
            signal.market.question, signal.edge_pct, signal.reason
        );
    }
    Ok(())
}

async fn mode_trade(
    config: &Config,
    preset: &str,
    bankroll: Option<f64>,
    cycles: Option<u64>,
    scan_only: bool,
) -> Result<()> {
    let mut trade_config = AutoTradeConfig::preset(preset)
        .ok_or_else(|| anyhow::anyhow!("unknown preset: {preset}"))?;
    if let Some(bankroll) = bankroll {
        trade_config.bankroll = bankroll;
    }
    trade_config.min_liquidity = trade_config
        .min_liquidity
        .max(config.trading.min_market_liquidity);

    let store = Store::open(&config.db_path)?;
    let gateway = Arc::new(ExchangeGateway::new(config));
    if let Some(error) = gateway.auth_error() {
        warn!("auth client failed: {error}");
    }
    if !gateway.has_auth() {
        warn!("no credentials configured - orders will be rejected at submission");
    }
    let fetcher = MarketFetcher::new(&config.gamma_host, gateway.limiter());
    let exchange: Arc<dyn Exchange> = gateway;

    let portfolio = Arc::new(Portfolio::load(store.clone()).await?);
    let engine = OrderEngine::new(
        Arc::clone(&exchange),
        store.clone(),
        Arc::clone(&portfolio),
        config.trading.clone(),
        config.safety.clone(),
        5,
    )
    .await?;

    let odds = config
        .odds_api_key
        .as_ref()
        .map(|key| Arc::new(OddsClient::new(&config.odds_host, Some(key.clone()))));
    if odds.is_some() {
        info!("external odds model enabled (sports bookmaker consensus)");
    }
    let strategies = StrategyEngine::with_defaults(StrategyContext {
        store: store.clone(),
        exchange: Arc::clone(&exchange),
        odds,
    });

    let risk = RiskManager::new(config.trading.clone(), config.safety.clone(), store.clone());

    let trader = Arc::new(AutoTrader::new(
        trade_config,
        fetcher,
        strategies,
        engine,
        portfolio,
        risk,
        exchange,
        store,
    ));

    let stopper = Arc::clone(&trader);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received - stopping after the current cycle");
            stopper.stop();
        }
    });

    if scan_only {
        trader.run_scan_only(cycles).await;
    } else {
        trader.run(cycles).await;
    }
    Ok(())
}
