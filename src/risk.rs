//! Risk and safety guards evaluated around every order submission.
//!
//! Independent controls, composed by the orchestrator: bankroll-aware bet
//! sizing, a process-wide kill switch that blocks new entries but never
//! exits, an orderbook spread guard, daily-loss and drawdown circuit
//! breakers, and deterministic intent fingerprints for submission
//! idempotency. Breakers only ever set the kill switch; clearing it takes
//! an operator restart with a fresh bankroll baseline.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{SafetyConfig, TradingConfig};
use crate::gateway::Exchange;
use crate::models::OrderSide;
use crate::portfolio::Portfolio;
use crate::store::Store;

const PNL_DAY_KEY: &str = "pnl_day";
const PNL_DAY_START_KEY: &str = "realized_pnl_day_start";
const CASH_START_KEY: &str = "cash_start_usd";

/// Minimum bet the sizer will approve.
pub const MIN_BET_USD: f64 = 5.0;

/// Deterministic fingerprint of an order's identifying parameters.
///
/// Price rounds to 4 decimals and size to 2 before hashing, so retries of
/// the same logical order collide while genuinely different orders do not.
/// The coarse time bucket (`now / ttl`) bounds how long a fingerprint
/// shadows resubmission.
pub fn intent_fingerprint(
    token_id: &str,
    side: &str,
    order_side: OrderSide,
    price: f64,
    size: f64,
    strategy: Option<&str>,
    ttl_seconds: u64,
) -> String {
    let bucket = if ttl_seconds > 0 {
        Utc::now().timestamp() / ttl_seconds as i64
    } else {
        0
    };
    let payload = format!(
        "{token_id}|{side}|{}|{:.4}|{:.2}|{}|{bucket}",
        order_side.as_str(),
        price,
        size,
        strategy.unwrap_or("")
    );
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(&digest[..16])
}

/// Outcome of the spread guard for one token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpreadCheck {
    Ok(f64),
    TooWide(f64),
    /// Missing or inverted book.
    NoBook,
}

impl SpreadCheck {
    pub fn passed(&self) -> bool {
        matches!(self, SpreadCheck::Ok(_))
    }
}

pub struct RiskManager {
    trading: TradingConfig,
    safety: SafetyConfig,
    store: Store,
    kill_switch: Arc<AtomicBool>,
}

impl RiskManager {
    pub fn new(trading: TradingConfig, safety: SafetyConfig, store: Store) -> Self {
        let kill_switch = Arc::new(AtomicBool::new(safety.kill_switch));
        if safety.kill_switch {
            warn!("kill switch enabled from configuration - new entries blocked");
        }
        Self {
            trading,
            safety,
            store,
            kill_switch,
        }
    }

    // ── Kill switch ───────────────────────────────────────────

    pub fn kill_switch(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    pub fn trip_kill_switch(&self, reason: &str) {
        if !self.kill_switch.swap(true, Ordering::SeqCst) {
            error!("CIRCUIT BREAKER: {reason} - halting new entries (exits still run)");
        }
    }

    // ── Bet sizing ────────────────────────────────────────────

    /// Bankroll-aware bet size: keep a reserve, cap at `max_bet_size` and a
    /// quarter of what's left. Returns `None` when the bet would be below
    /// the floor or the position count is maxed out.
    pub fn bet_size(
        &self,
        bankroll: f64,
        reserve_pct: f64,
        max_bet_size: f64,
        open_value: f64,
        open_positions: usize,
        max_open_positions: usize,
    ) -> Option<f64> {
        if open_positions >= max_open_positions {
            return None;
        }
        let reserve = bankroll * reserve_pct / 100.0;
        let available = bankroll - reserve - open_value;
        let bet = max_bet_size.min(available * 0.25);
        (bet >= MIN_BET_USD).then_some(bet)
    }

    // ── Spread guard ──────────────────────────────────────────

    pub async fn check_spread(&self, exchange: &dyn Exchange, token_id: &str) -> SpreadCheck {
        let Some(book) = exchange.get_order_book(token_id).await else {
            return SpreadCheck::NoBook;
        };
        match book.spread_bps() {
            Some(bps) if bps <= self.safety.max_spread_bps => SpreadCheck::Ok(bps),
            Some(bps) => SpreadCheck::TooWide(bps),
            None => SpreadCheck::NoBook,
        }
    }

    // ── Circuit breakers ──────────────────────────────────────

    /// Evaluate the daily-loss and drawdown breakers. Trips the kill switch
    /// and returns the reason when one fires. Never untrips.
    pub async fn check_circuit_breakers(
        &self,
        portfolio: &Portfolio,
        bankroll: f64,
    ) -> anyhow::Result<Option<String>> {
        let realized = portfolio.realized_pnl().await;

        // New calendar day: snapshot the day-start realized P&L.
        let today = Utc::now().date_naive().to_string();
        let day_key = self.store.get_state(PNL_DAY_KEY).await?.unwrap_or_default();
        if day_key != today {
            self.store.set_state(PNL_DAY_KEY, &today).await?;
            self.store
                .set_state(PNL_DAY_START_KEY, &realized.to_string())
                .await?;
        }

        if self.safety.max_daily_loss_usd > 0.0 {
            let day_start = self.store.get_state_f64(PNL_DAY_START_KEY, realized).await?;
            let daily_realized = realized - day_start;
            if daily_realized <= -self.safety.max_daily_loss_usd.abs() {
                let reason = format!(
                    "MAX_DAILY_LOSS_USD triggered (daily_realized={daily_realized:.2})"
                );
                self.trip_kill_switch(&reason);
                return Ok(Some(reason));
            }
        }

        if self.safety.max_drawdown_pct > 0.0 {
            let cash_start = self.store.get_state_f64(CASH_START_KEY, bankroll).await?;
            let equity = cash_start + realized + portfolio.get_total_unrealized_pnl().await;
            if cash_start > 0.0 {
                let drawdown_pct = (cash_start - equity) / cash_start * 100.0;
                if drawdown_pct >= self.safety.max_drawdown_pct.abs() {
                    let reason =
                        format!("MAX_DRAWDOWN_PCT triggered (drawdown={drawdown_pct:.2}%)");
                    self.trip_kill_switch(&reason);
                    return Ok(Some(reason));
                }
            }
        }

        Ok(None)
    }

    // ── Startup actions ───────────────────────────────────────

    /// Best-effort safety actions at boot: optional cancel-all, stale
    /// intent cleanup, and KV seeding for the breakers.
    pub async fn startup(&self, exchange: &dyn Exchange, bankroll: f64) -> anyhow::Result<()> {
        if self.safety.cancel_all_on_startup && exchange.has_auth() {
            let cancelled = exchange.cancel_all().await;
            info!("startup: cancel_all executed ({cancelled} orders)");
        }

        let horizon = (self.safety.intent_ttl_seconds * 10).max(600);
        match self.store.cleanup_old_intents(horizon as i64).await {
            Ok(0) => {}
            Ok(n) => info!("startup: removed {n} stale order intents"),
            Err(e) => warn!("startup intent cleanup failed: {e}"),
        }

        if self.store.get_state(CASH_START_KEY).await?.is_none() {
            self.store
                .set_state(CASH_START_KEY, &bankroll.to_string())
                .await?;
        }
        Ok(())
    }

    pub fn trading(&self) -> &TradingConfig {
        &self.trading
    }

    pub fn safety(&self) -> &SafetyConfig {
        &self.safety
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;

    fn trading() -> TradingConfig {
        TradingConfig {
            max_trade_size: 100.0,
            max_total_exposure: 1000.0,
            min_market_liquidity: 5000.0,
            default_slippage: 0.01,
        }
    }

    fn safety(max_daily_loss: f64, max_drawdown: f64) -> SafetyConfig {
        SafetyConfig {
            kill_switch: false,
            max_spread_bps: 150.0,
            order_ttl_seconds: 1800,
            cancel_all_on_startup: false,
            max_daily_loss_usd: max_daily_loss,
            max_drawdown_pct: max_drawdown,
            intent_ttl_seconds: 300,
        }
    }

    #[test]
    fn test_fingerprint_deterministic_and_rounded() {
        let a = intent_fingerprint("tok", "YES", OrderSide::Buy, 0.5, 10.0, Some("momentum"), 300);
        let b = intent_fingerprint(
            "tok",
            "YES",
            OrderSide::Buy,
            0.50004,
            10.001,
            Some("momentum"),
            300,
        );
        // Same after rounding to 4dp price / 2dp size.
        assert_eq!(a, b);

        let c = intent_fingerprint("tok", "YES", OrderSide::Buy, 0.51, 10.0, Some("momentum"), 300);
        assert_ne!(a, c);
        let d = intent_fingerprint("tok", "YES", OrderSide::Sell, 0.5, 10.0, Some("momentum"), 300);
        assert_ne!(a, d);
    }

    #[test]
    fn test_bet_sizing() {
        let manager = RiskManager::new(trading(), safety(0.0, 0.0), Store::open_in_memory().unwrap());

        // bankroll 50, reserve 20% = 10, open 0 -> available 40 -> bet min(10, 10) = 10
        let bet = manager.bet_size(50.0, 20.0, 10.0, 0.0, 0, 5).unwrap();
        assert!((bet - 10.0).abs() < 1e-9);

        // Open value eats the headroom: available 40-25=15 -> 0.25*15=3.75 < $5 floor.
        assert!(manager.bet_size(50.0, 20.0, 10.0, 25.0, 1, 5).is_none());

        // Position cap.
        assert!(manager.bet_size(1000.0, 20.0, 10.0, 0.0, 5, 5).is_none());
    }

    #[tokio::test]
    async fn test_daily_loss_breaker_trips_kill_switch() {
        let store = Store::open_in_memory().unwrap();
        let portfolio = Portfolio::load(store.clone()).await.unwrap();
        let manager = RiskManager::new(trading(), safety(50.0, 0.0), store.clone());

        // Day starts at 0 realized; lose 60 on a close.
        assert!(manager
            .check_circuit_breakers(&portfolio, 1000.0)
            .await
            .unwrap()
            .is_none());
        portfolio
            .add_position("tok", "q", Outcome::Yes, 100.0, 0.80, None, None)
            .await
            .unwrap();
        portfolio
            .close_position("tok", Outcome::Yes, 100.0, 0.20, None, None)
            .await
            .unwrap();

        let reason = manager
            .check_circuit_breakers(&portfolio, 1000.0)
            .await
            .unwrap();
        assert!(reason.unwrap().contains("MAX_DAILY_LOSS_USD"));
        assert!(manager.kill_switch());
    }

    #[tokio::test]
    async fn test_drawdown_breaker() {
        let store = Store::open_in_memory().unwrap();
        let portfolio = Portfolio::load(store.clone()).await.unwrap();
        let manager = RiskManager::new(trading(), safety(0.0, 10.0), store.clone());
        store.set_state("cash_start_usd", "1000").await.unwrap();

        // Realize a 150 loss: equity 850, drawdown 15% >= 10%.
        portfolio
            .add_position("tok", "q", Outcome::Yes, 300.0, 0.60, None, None)
            .await
            .unwrap();
        portfolio
            .close_position("tok", Outcome::Yes, 300.0, 0.10, None, None)
            .await
            .unwrap();

        let reason = manager
            .check_circuit_breakers(&portfolio, 1000.0)
            .await
            .unwrap();
        assert!(reason.unwrap().contains("MAX_DRAWDOWN_PCT"));
        assert!(manager.kill_switch());
    }

    #[tokio::test]
    async fn test_breaker_never_untrips() {
        let store = Store::open_in_memory().unwrap();
        let portfolio = Portfolio::load(store.clone()).await.unwrap();
        let manager = RiskManager::new(trading(), safety(50.0, 0.0), store);

        manager.trip_kill_switch("manual");
        assert!(manager.kill_switch());
        // A healthy check does not clear it.
        manager
            .check_circuit_breakers(&portfolio, 1000.0)
            .await
            .unwrap();
        assert!(manager.kill_switch());
    }
}
