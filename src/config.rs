//! Environment-driven configuration.
//!
//! Everything is controlled through environment variables (with a `.env`
//! file loaded on startup). Credentials enable the authenticated trading
//! path; without them the bot degrades to read-only scanning.

use serde::{Deserialize, Serialize};
use std::env;

const GAMMA_API_HOST: &str = "https://gamma-api.polymarket.com";
const CLOB_HOST: &str = "https://clob.polymarket.com";
const ODDS_API_HOST: &str = "https://api.the-odds-api.com";

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v as u64)
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Hard caps on individual trades and total book exposure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub max_trade_size: f64,
    pub max_total_exposure: f64,
    pub min_market_liquidity: f64,
    pub default_slippage: f64,
}

/// Live-only safety controls. There is no paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Blocks NEW entries when set. SELL exits still flow through.
    pub kill_switch: bool,
    pub max_spread_bps: f64,
    /// Stale LIVE orders get a best-effort cancel after this long.
    pub order_ttl_seconds: u64,
    pub cancel_all_on_startup: bool,
    /// 0 disables.
    pub max_daily_loss_usd: f64,
    /// 0 disables.
    pub max_drawdown_pct: f64,
    /// Idempotency window for order intents.
    pub intent_ttl_seconds: u64,
}

/// Thresholds for the price-tracking alert mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub price_change_threshold: f64,
}

/// Top-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub private_key: String,
    pub funder_address: String,
    pub clob_host: String,
    pub gamma_host: String,
    pub odds_host: String,
    pub db_path: String,
    pub api_rate_limit: f64,
    pub odds_api_key: Option<String>,
    pub trading: TradingConfig,
    pub safety: SafetyConfig,
    pub alerts: AlertConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            private_key: env::var("PRIVATE_KEY").unwrap_or_default(),
            funder_address: env::var("FUNDER_ADDRESS").unwrap_or_default(),
            clob_host: env::var("CLOB_HOST").unwrap_or_else(|_| CLOB_HOST.to_string()),
            gamma_host: env::var("GAMMA_HOST").unwrap_or_else(|_| GAMMA_API_HOST.to_string()),
            odds_host: env::var("ODDS_API_HOST").unwrap_or_else(|_| ODDS_API_HOST.to_string()),
            db_path: env::var("BOT_DB_PATH").unwrap_or_else(|_| "./polybot.db".to_string()),
            api_rate_limit: env_f64("API_RATE_LIMIT", 10.0),
            odds_api_key: env::var("ODDS_API_KEY").ok().filter(|k| !k.is_empty()),
            trading: TradingConfig {
                max_trade_size: env_f64("MAX_TRADE_SIZE", 100.0),
                max_total_exposure: env_f64("MAX_TOTAL_EXPOSURE", 1000.0),
                min_market_liquidity: env_f64("MIN_MARKET_LIQUIDITY", 5000.0),
                default_slippage: env_f64("DEFAULT_SLIPPAGE", 0.01),
            },
            safety: SafetyConfig {
                kill_switch: env_bool("KILL_SWITCH", false),
                max_spread_bps: env_f64("MAX_SPREAD_BPS", 150.0),
                order_ttl_seconds: env_u64("ORDER_TTL_SECONDS", 1800),
                cancel_all_on_startup: env_bool("CANCEL_ALL_ON_STARTUP", false),
                max_daily_loss_usd: env_f64("MAX_DAILY_LOSS_USD", 0.0),
                max_drawdown_pct: env_f64("MAX_DRAWDOWN_PCT", 0.0),
                intent_ttl_seconds: env_u64("INTENT_TTL_SECONDS", 300),
            },
            alerts: AlertConfig {
                price_change_threshold: env_f64("PRICE_CHANGE_THRESHOLD", 0.05),
            },
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.private_key.is_empty() && !self.funder_address.is_empty()
    }

    /// Sanity checks; returns human-readable issues (empty means valid).
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.private_key.is_empty() {
            issues.push("PRIVATE_KEY not set - trading disabled".to_string());
        }
        if self.funder_address.is_empty() {
            issues.push("FUNDER_ADDRESS not set - trading disabled".to_string());
        }
        if self.trading.max_trade_size <= 0.0 {
            issues.push("MAX_TRADE_SIZE must be positive".to_string());
        }
        if self.trading.max_total_exposure < self.trading.max_trade_size {
            issues.push("MAX_TOTAL_EXPOSURE should be >= MAX_TRADE_SIZE".to_string());
        }
        if self.safety.order_ttl_seconds < 10 {
            issues.push("ORDER_TTL_SECONDS too low (<10)".to_string());
        }
        if self.safety.max_spread_bps <= 0.0 {
            issues.push("MAX_SPREAD_BPS must be positive".to_string());
        }

        issues
    }
}
