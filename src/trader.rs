//! AutoTrader: the scan-cycle orchestrator.
//!
//! Each cycle: fetch and prefilter the market universe, persist price
//! snapshots, ask the strategy engine for ranked signals, evaluate circuit
//! breakers, then walk the signals through the entry gates (existing
//! position, kill switch, spread, bet sizing) up to the per-cycle cap.
//! Exits run continuously in the background monitor; the cycle also ticks
//! it once and force-closes positions past the max hold time.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::gateway::{Exchange, MarketFetcher};
use crate::models::{Market, Outcome, PriceSnapshot, SignalSide};
use crate::orders::OrderEngine;
use crate::portfolio::{truncate, Portfolio};
use crate::risk::RiskManager;
use crate::store::Store;
use crate::strategy::{Signal, StrategyEngine};

/// Knobs for one trading run. Presets give orienting values; everything is
/// overridable.
#[derive(Debug, Clone)]
pub struct AutoTradeConfig {
    // Money management
    pub bankroll: f64,
    pub max_bet_size: f64,
    pub max_open_positions: usize,
    pub reserve_percent: f64,

    // Strategy set and universe
    pub strategies: Vec<String>,
    pub categories: Vec<String>,
    pub min_volume: f64,
    pub min_liquidity: f64,
    pub min_edge_pct: f64,
    pub max_signals: usize,
    pub market_fetch_limit: u32,

    // Time-based filtering. Sports games are scheduled, so they get a
    // shorter horizon than crypto.
    pub min_hours_to_resolution: f64,
    pub max_days_to_resolution: f64,
    pub sports_max_days: f64,
    pub crypto_max_days: f64,
    pub prefer_ending_soon: bool,

    // Exits
    pub take_profit_percent: f64,
    pub stop_loss_percent: f64,
    pub trailing_stop_percent: Option<f64>,
    pub max_hold_hours: f64,

    // Timing
    pub scan_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub max_bets_per_cycle: usize,
}

impl Default for AutoTradeConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl AutoTradeConfig {
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "conservative" => Some(Self {
                max_bet_size: 5.0,
                max_open_positions: 3,
                reserve_percent: 30.0,
                strategies: vec!["arbitrage".to_string()],
                min_edge_pct: 2.0,
                take_profit_percent: 20.0,
                stop_loss_percent: 10.0,
                scan_interval_secs: 600,
                ..Self::balanced()
            }),
            "balanced" => Some(Self::balanced()),
            "aggressive" => Some(Self {
                max_bet_size: 20.0,
                max_open_positions: 8,
                reserve_percent: 10.0,
                strategies: vec![
                    "arbitrage".to_string(),
                    "value".to_string(),
                    "momentum".to_string(),
                    "mean_reversion".to_string(),
                ],
                min_edge_pct: 5.0,
                take_profit_percent: 50.0,
                stop_loss_percent: 20.0,
                scan_interval_secs: 180,
                ..Self::balanced()
            }),
            "scalper" => Some(Self {
                max_bet_size: 10.0,
                max_open_positions: 10,
                reserve_percent: 10.0,
                strategies: vec!["arbitrage".to_string()],
                min_edge_pct: 1.5,
                take_profit_percent: 10.0,
                stop_loss_percent: 5.0,
                scan_interval_secs: 60,
                max_hold_hours: 6.0,
                ..Self::balanced()
            }),
            "sports_tonight" => Some(Self {
                categories: vec!["sports".to_string()],
                strategies: vec!["value_sports".to_string(), "favorites".to_string()],
                sports_max_days: 1.0,
                take_profit_percent: 40.0,
                stop_loss_percent: 20.0,
                ..Self::balanced()
            }),
            _ => None,
        }
    }

    fn balanced() -> Self {
        Self {
            bankroll: 50.0,
            max_bet_size: 10.0,
            max_open_positions: 5,
            reserve_percent: 20.0,
            strategies: vec![
                "arbitrage".to_string(),
                "value".to_string(),
                "momentum".to_string(),
            ],
            categories: vec!["crypto".to_string(), "sports".to_string()],
            min_volume: 50_000.0,
            min_liquidity: 10_000.0,
            min_edge_pct: 10.0,
            max_signals: 10,
            market_fetch_limit: 50,
            min_hours_to_resolution: 2.0,
            max_days_to_resolution: 7.0,
            sports_max_days: 3.0,
            crypto_max_days: 7.0,
            prefer_ending_soon: true,
            take_profit_percent: 30.0,
            stop_loss_percent: 15.0,
            trailing_stop_percent: None,
            max_hold_hours: 48.0,
            scan_interval_secs: 300,
            monitor_interval_secs: 10,
            max_bets_per_cycle: 2,
        }
    }
}

/// Per-cycle summary for the operator log.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub markets_scanned: usize,
    pub signals_found: usize,
    pub bets_placed: usize,
    pub open_positions: usize,
    pub pending_fills: usize,
    pub realized_pnl: f64,
}

pub struct AutoTrader {
    config: AutoTradeConfig,
    fetcher: MarketFetcher,
    strategies: StrategyEngine,
    engine: Arc<OrderEngine>,
    portfolio: Arc<Portfolio>,
    risk: RiskManager,
    exchange: Arc<dyn Exchange>,
    store: Store,
    running: AtomicBool,
}

impl AutoTrader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AutoTradeConfig,
        fetcher: MarketFetcher,
        strategies: StrategyEngine,
        engine: Arc<OrderEngine>,
        portfolio: Arc<Portfolio>,
        risk: RiskManager,
        exchange: Arc<dyn Exchange>,
        store: Store,
    ) -> Self {
        info!("auto trader initialized");
        info!(
            "  bankroll ${:.0} | max bet ${:.0} | TP +{}% | SL -{}% | strategies: {}",
            config.bankroll,
            config.max_bet_size,
            config.take_profit_percent,
            config.stop_loss_percent,
            config.strategies.join(", ")
        );
        info!(
            "  categories: {} | sports max {}d | crypto max {}d | force sell after {}h",
            config.categories.join(", "),
            config.sports_max_days,
            config.crypto_max_days,
            config.max_hold_hours
        );
        Self {
            config,
            fetcher,
            strategies,
            engine,
            portfolio,
            risk,
            exchange,
            store,
            running: AtomicBool::new(false),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    // ── Scanning ──────────────────────────────────────────────

    /// Fetch the configured categories and apply the volume, liquidity and
    /// resolution-time gates.
    pub async fn scan_markets(&self) -> Vec<Market> {
        let markets = self
            .fetcher
            .all_target_markets(&self.config.categories, self.config.market_fetch_limit, None)
            .await;
        self.prefilter(markets)
    }

    fn prefilter(&self, markets: Vec<Market>) -> Vec<Market> {
        prefilter_markets(&self.config, markets)
    }

    /// Persist one price observation per market so the history-driven
    /// strategies have data to work with.
    async fn record_snapshots(&self, markets: &[Market]) {
        let now = Utc::now();
        for market in markets {
            let snap = PriceSnapshot {
                token_id: market.token_id_yes.clone(),
                timestamp: now,
                price_yes: market.price_yes,
                price_no: market.price_no,
                best_bid: None,
                best_ask: None,
            };
            if let Err(e) = self.store.save_price_snapshot(&snap).await {
                warn!("failed to record snapshot for {}: {e}", market.token_id_yes);
                break;
            }
        }
    }

    // ── Entry path ────────────────────────────────────────────

    async fn has_exposure_to(&self, market: &Market) -> bool {
        if self.portfolio.position(&market.token_id_yes, Outcome::Yes).await.is_some()
            || self.portfolio.position(&market.token_id_no, Outcome::No).await.is_some()
        {
            return true;
        }
        for token in [&market.token_id_yes, &market.token_id_no] {
            match self.store.has_live_order_for_token(token).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!("pending-order lookup failed for {token}: {e}");
                    return true;
                }
            }
        }
        false
    }

    async fn spread_ok(&self, signal: &Signal) -> bool {
        let tokens: Vec<&str> = match signal.side {
            SignalSide::Arb => vec![
                &signal.market.token_id_yes,
                &signal.market.token_id_no,
            ],
            SignalSide::Yes => vec![&signal.market.token_id_yes],
            SignalSide::No => vec![&signal.market.token_id_no],
        };
        for token in tokens {
            let check = self.risk.check_spread(self.exchange.as_ref(), token).await;
            if !check.passed() {
                info!(
                    "skip (spread guard {:?}): {}",
                    check,
                    truncate(&signal.market.question, 50)
                );
                return false;
            }
        }
        true
    }

    /// Run one signal through the entry gates and place the bet. Returns
    /// true when an order went out.
    pub async fn enter_signal(&self, signal: &Signal) -> bool {
        let market = &signal.market;

        if self.has_exposure_to(market).await {
            return false;
        }
        // The kill switch blocks new BUY entries only; exits keep flowing.
        if self.risk.kill_switch() {
            return false;
        }
        if !self.spread_ok(signal).await {
            return false;
        }

        let open_value = self.portfolio.get_total_exposure().await;
        let open_count = self.portfolio.open_positions_count().await;
        let Some(bet_size) = self.risk.bet_size(
            self.config.bankroll,
            self.config.reserve_percent,
            self.config.max_bet_size,
            open_value,
            open_count,
            self.config.max_open_positions,
        ) else {
            info!("skip (bet sizing): insufficient headroom or position cap");
            return false;
        };

        let hours_left = market.hours_to_resolution();
        info!(
            "placing bet: {} {} @ {:.3} | ${bet_size:.2} | {} | resolves in {:.1}h",
            signal.side.as_str(),
            truncate(&market.question, 50),
            signal.entry_price,
            signal.strategy,
            hours_left
        );

        match signal.side {
            SignalSide::Arb => {
                // Guaranteed-buy-both: split the notional across the legs.
                let half = bet_size / 2.0;
                let yes = self
                    .engine
                    .buy(
                        &market.token_id_yes,
                        &market.question,
                        Outcome::Yes,
                        half / market.price_yes,
                        market.price_yes,
                        Some(&signal.strategy),
                    )
                    .await;
                let no = self
                    .engine
                    .buy(
                        &market.token_id_no,
                        &market.question,
                        Outcome::No,
                        half / market.price_no,
                        market.price_no,
                        Some(&signal.strategy),
                    )
                    .await;
                if yes.success && no.success {
                    info!("arbitrage placed on both legs");
                    true
                } else {
                    warn!(
                        "arbitrage entry incomplete (yes: {:?}, no: {:?})",
                        yes.error, no.error
                    );
                    yes.success || no.success
                }
            }
            SignalSide::Yes | SignalSide::No => {
                let outcome = signal.side.outcome().expect("non-arb side");
                let entry = signal.entry_price;
                let tp = (entry * (1.0 + self.config.take_profit_percent / 100.0)).min(0.99);
                let sl = (entry * (1.0 - self.config.stop_loss_percent / 100.0)).max(0.01);
                let result = self
                    .engine
                    .buy_with_tp_sl(
                        market.token_for(outcome),
                        &market.question,
                        outcome,
                        bet_size / entry,
                        entry,
                        Some(tp),
                        Some(sl),
                        self.config.trailing_stop_percent,
                        Some(&signal.strategy),
                    )
                    .await;
                if !result.buy.success {
                    warn!(
                        "bet failed: {}",
                        result.buy.error.as_deref().unwrap_or("unknown")
                    );
                }
                result.buy.success
            }
        }
    }

    /// Close positions held past the configured maximum.
    async fn force_close_aged(&self) {
        let now = Utc::now();
        for position in self.portfolio.positions().await {
            let held_hours = (now - position.opened_at).num_seconds() as f64 / 3600.0;
            if held_hours < self.config.max_hold_hours {
                continue;
            }
            info!(
                "max hold time reached ({held_hours:.1}h): closing {}",
                truncate(&position.market_question, 50)
            );
            let ack = self
                .engine
                .market_sell(
                    &position.token_id,
                    &position.market_question,
                    position.side,
                    position.size,
                    Some("timeout"),
                )
                .await;
            if !ack.success {
                warn!(
                    "timeout close failed for {}: {}",
                    position.token_id,
                    ack.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // ── Cycle ─────────────────────────────────────────────────

    pub async fn run_cycle(&self) -> CycleReport {
        info!("scanning markets...");
        let markets = self.scan_markets().await;
        info!("  {} markets match criteria", markets.len());
        self.record_snapshots(&markets).await;

        let signals = self
            .strategies
            .find_signals(
                &markets,
                &self.config.strategies,
                self.config.min_edge_pct,
                self.config.max_signals,
            )
            .await;
        info!("  {} signals found", signals.len());

        match self
            .risk
            .check_circuit_breakers(&self.portfolio, self.config.bankroll)
            .await
        {
            Ok(Some(_)) => {} // already logged, kill switch now set
            Ok(None) => {}
            Err(e) => warn!("circuit breaker evaluation failed: {e}"),
        }

        let mut bets_placed = 0;
        for signal in &signals {
            if bets_placed >= self.config.max_bets_per_cycle {
                break;
            }
            if self.enter_signal(signal).await {
                bets_placed += 1;
            }
        }

        // Exit evaluation also runs in the background; this tick keeps the
        // cycle self-contained when the monitor interval is long.
        self.engine.monitor_tick().await;
        self.force_close_aged().await;

        if let Err(e) = self.portfolio.update_prices(self.exchange.as_ref()).await {
            warn!("price refresh failed: {e}");
        }

        let report = CycleReport {
            markets_scanned: markets.len(),
            signals_found: signals.len(),
            bets_placed,
            open_positions: self.portfolio.open_positions_count().await,
            pending_fills: self.engine.tracker().pending_count(),
            realized_pnl: self.portfolio.realized_pnl().await,
        };
        self.status_report(&report).await;
        report
    }

    async fn status_report(&self, report: &CycleReport) {
        info!(
            "cycle done: {} markets | {} signals | {} bets | {} open | {} pending fills | \
             realized ${:+.2}",
            report.markets_scanned,
            report.signals_found,
            report.bets_placed,
            report.open_positions,
            report.pending_fills,
            report.realized_pnl
        );
        if self.risk.kill_switch() {
            warn!("kill switch is ON - new entries blocked, exits still running");
        }
    }

    // ── Main loops ────────────────────────────────────────────

    /// Full trading loop. `cycles: None` runs until `stop()`.
    pub async fn run(&self, cycles: Option<u64>) {
        self.running.store(true, Ordering::SeqCst);

        if let Err(e) = self
            .risk
            .startup(self.exchange.as_ref(), self.config.bankroll)
            .await
        {
            warn!("startup safety actions failed: {e}");
        }
        self.engine.tracker().start();
        self.engine.start_monitor(self.config.monitor_interval_secs);

        info!(
            "auto trader started (scanning every {}s)",
            self.config.scan_interval_secs
        );

        let mut completed = 0u64;
        while self.running.load(Ordering::SeqCst) {
            self.run_cycle().await;
            completed += 1;
            if let Some(max) = cycles {
                if completed >= max {
                    break;
                }
            }
            info!("sleeping {}s until next scan", self.config.scan_interval_secs);
            self.interruptible_sleep(self.config.scan_interval_secs).await;
        }

        self.running.store(false, Ordering::SeqCst);
        self.engine.stop_monitor();
        self.engine.tracker().stop();
        self.final_report().await;
    }

    /// Preview mode: scans and reports opportunities, places nothing.
    pub async fn run_scan_only(&self, cycles: Option<u64>) {
        self.running.store(true, Ordering::SeqCst);
        info!("scan mode - watching only, no bets placed");

        let mut completed = 0u64;
        while self.running.load(Ordering::SeqCst) {
            let markets = self.scan_markets().await;
            self.record_snapshots(&markets).await;
            let signals = self
                .strategies
                .find_signals(
                    &markets,
                    &self.config.strategies,
                    self.config.min_edge_pct,
                    self.config.max_signals,
                )
                .await;

            info!("{} markets | {} opportunities", markets.len(), signals.len());
            for (i, signal) in signals.iter().take(5).enumerate() {
                info!(
                    "  {}. {} {} @ {:.0}% | edge {:.1}% | conf {:.2} | {}",
                    i + 1,
                    signal.side.as_str(),
                    truncate(&signal.market.question, 45),
                    signal.entry_price * 100.0,
                    signal.edge_pct,
                    signal.confidence,
                    signal.strategy
                );
                info!("     {}", signal.reason);
            }

            completed += 1;
            if let Some(max) = cycles {
                if completed >= max {
                    break;
                }
            }
            self.interruptible_sleep(self.config.scan_interval_secs).await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn interruptible_sleep(&self, secs: u64) {
        for _ in 0..secs {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }

    async fn final_report(&self) {
        let stats = match self.store.trade_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("final report unavailable: {e}");
                return;
            }
        };
        let realized = self.portfolio.realized_pnl().await;
        info!("final report");
        info!("  starting bankroll ${:.2}", self.config.bankroll);
        info!("  realized P&L ${realized:+.2}");
        info!(
            "  trades: {} ({} buys / {} sells) | wins {} | win rate {:.1}%",
            stats.total_trades, stats.buys, stats.sells, stats.wins, stats.win_rate
        );
        info!(
            "  open positions: {}",
            self.portfolio.open_positions_count().await
        );
    }
}

/// Volume, liquidity and category-aware resolution-time gates, with an
/// optional soonest-first sort.
pub(crate) fn prefilter_markets(config: &AutoTradeConfig, markets: Vec<Market>) -> Vec<Market> {
    let mut filtered: Vec<Market> = markets
        .into_iter()
        .filter(|m| m.volume >= config.min_volume && m.liquidity >= config.min_liquidity)
        .filter(|m| {
            let hours_left = m.hours_to_resolution();
            if hours_left < config.min_hours_to_resolution {
                return false;
            }
            let days_left = hours_left / 24.0;
            let max_days = match m.inferred_category() {
                "sports" => config.sports_max_days,
                "crypto" => config.crypto_max_days,
                _ => config.max_days_to_resolution,
            };
            days_left <= max_days
        })
        .collect();

    if config.prefer_ending_soon {
        filtered.sort_by(|a, b| {
            a.hours_to_resolution()
                .partial_cmp(&b.hours_to_resolution())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn market_ending_in(id: &str, question: &str, hours: f64, volume: f64) -> Market {
        Market {
            id: id.to_string(),
            question: question.to_string(),
            slug: id.to_string(),
            condition_id: format!("0x{id}"),
            token_id_yes: format!("{id}_yes"),
            token_id_no: format!("{id}_no"),
            price_yes: 0.5,
            price_no: 0.5,
            volume,
            liquidity: 50_000.0,
            category: "crypto".to_string(),
            end_date: Some(
                (Utc::now() + ChronoDuration::seconds((hours * 3600.0) as i64)).to_rfc3339(),
            ),
        }
    }

    #[test]
    fn test_prefilter_gates_and_sorts() {
        let config = AutoTradeConfig::default();
        let markets = vec![
            market_ending_in("soon", "Will BTC rise?", 12.0, 100_000.0),
            market_ending_in("too_soon", "Will ETH rise?", 1.0, 100_000.0),
            market_ending_in("later", "Will SOL rise?", 48.0, 100_000.0),
            market_ending_in("thin", "Will DOGE rise?", 12.0, 1_000.0),
            market_ending_in("too_far", "Will XRP rise?", 24.0 * 30.0, 100_000.0),
        ];
        let filtered = prefilter_markets(&config, markets);
        let ids: Vec<&str> = filtered.iter().map(|m| m.id.as_str()).collect();
        // Soonest first; the 1h, thin-volume and 30-day markets are gone.
        assert_eq!(ids, vec!["soon", "later"]);
    }

    #[test]
    fn test_prefilter_sports_horizon_tighter() {
        let config = AutoTradeConfig::default();
        let sports = market_ending_in(
            "game",
            "Will the Lakers beat the Celtics in tonight's game?",
            24.0 * 5.0,
            100_000.0,
        );
        let crypto = market_ending_in("coin", "Will BTC rise this week?", 24.0 * 5.0, 100_000.0);
        let filtered = prefilter_markets(&config, vec![sports, crypto]);
        // 5 days out: beyond the 3-day sports horizon, inside the 7-day
        // crypto horizon.
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "coin");
    }

    #[test]
    fn test_presets_exist() {
        for name in [
            "conservative",
            "balanced",
            "aggressive",
            "scalper",
            "sports_tonight",
        ] {
            let preset = AutoTradeConfig::preset(name).unwrap();
            assert!(preset.max_bet_size > 0.0);
            assert!(!preset.strategies.is_empty());
        }
        assert!(AutoTradeConfig::preset("bogus").is_none());
    }

    #[test]
    fn test_sports_tonight_narrows_universe() {
        let preset = AutoTradeConfig::preset("sports_tonight").unwrap();
        assert_eq!(preset.categories, vec!["sports".to_string()]);
        assert_eq!(preset.sports_max_days, 1.0);
    }
}
