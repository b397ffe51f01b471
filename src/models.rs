//! Core domain types shared across the bot.
//!
//! Everything here is a plain data type: markets as fetched from the
//! exchange, portfolio positions, ledger trades, price snapshots and the
//! two kinds of managed orders (exchange orders being tracked for fills,
//! and local trigger orders). Enums are closed; string encoding happens
//! only at the store and wire boundaries via `as_str`/`parse`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which leg of a binary market a position or order refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Some(Outcome::Yes),
            "NO" => Some(Outcome::No),
            _ => None,
        }
    }
}

/// Side of a signal. `Arb` means "buy both legs".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSide {
    Yes,
    No,
    Arb,
}

impl SignalSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Yes => "YES",
            SignalSide::No => "NO",
            SignalSide::Arb => "ARB",
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            SignalSide::Yes => Some(Outcome::Yes),
            SignalSide::No => Some(Outcome::No),
            SignalSide::Arb => None,
        }
    }
}

/// BUY or SELL on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

/// Lifecycle of an order on the exchange book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Live,
    PartiallyFilled,
    Matched,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Live => "LIVE",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Matched => "MATCHED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIVE" => Some(OrderStatus::Live),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "MATCHED" | "FILLED" => Some(OrderStatus::Matched),
            "CANCELLED" | "CANCELED" => Some(OrderStatus::Cancelled),
            "EXPIRED" => Some(OrderStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Matched | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }
}

/// Kind of local trigger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoOrderType {
    TakeProfit,
    StopLoss,
    TrailingStop,
    LimitBuy,
    LimitSell,
}

impl AutoOrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOrderType::TakeProfit => "take_profit",
            AutoOrderType::StopLoss => "stop_loss",
            AutoOrderType::TrailingStop => "trailing_stop",
            AutoOrderType::LimitBuy => "limit_buy",
            AutoOrderType::LimitSell => "limit_sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "take_profit" => Some(AutoOrderType::TakeProfit),
            "stop_loss" => Some(AutoOrderType::StopLoss),
            "trailing_stop" => Some(AutoOrderType::TrailingStop),
            "limit_buy" => Some(AutoOrderType::LimitBuy),
            "limit_sell" => Some(AutoOrderType::LimitSell),
            _ => None,
        }
    }
}

/// Local trigger-order state machine.
///
/// ```text
/// PENDING ─┬─▶ ACTIVE ─┬─▶ TRIGGERED ─┬─▶ EXECUTED
///          │           │              └─▶ FAILED
///          │           └─▶ CANCELLED
///          └─▶ CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoOrderState {
    Pending,
    Active,
    Triggered,
    Executed,
    Cancelled,
    Failed,
}

impl AutoOrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOrderState::Pending => "pending",
            AutoOrderState::Active => "active",
            AutoOrderState::Triggered => "triggered",
            AutoOrderState::Executed => "executed",
            AutoOrderState::Cancelled => "cancelled",
            AutoOrderState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AutoOrderState::Pending),
            "active" => Some(AutoOrderState::Active),
            "triggered" => Some(AutoOrderState::Triggered),
            "executed" => Some(AutoOrderState::Executed),
            "cancelled" => Some(AutoOrderState::Cancelled),
            "failed" => Some(AutoOrderState::Failed),
            _ => None,
        }
    }
}

/// A binary market as listed on the exchange. Immutable per fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub slug: String,
    pub condition_id: String,
    pub token_id_yes: String,
    pub token_id_no: String,
    pub price_yes: f64,
    pub price_no: f64,
    pub volume: f64,
    pub liquidity: f64,
    pub category: String,
    pub end_date: Option<String>,
}

impl Market {
    /// Distance of YES+NO from $1.00 as quoted by the listing API.
    pub fn listed_spread(&self) -> f64 {
        (1.0 - self.price_yes - self.price_no).abs()
    }

    pub fn price_for(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::Yes => self.price_yes,
            Outcome::No => self.price_no,
        }
    }

    pub fn token_for(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.token_id_yes,
            Outcome::No => &self.token_id_no,
        }
    }

    /// Keyword-based sports/crypto classification used by the orchestrator's
    /// category-aware time filters.
    pub fn inferred_category(&self) -> &'static str {
        let question = self.question.to_lowercase();
        const SPORTS: &[&str] = &[
            "win", "championship", "super bowl", "nba", "nfl", "mlb", "nhl", "world series",
            "playoffs", "finals", "game", "match", "vs", "score", "premier league", "uefa", "fifa",
        ];
        const CRYPTO: &[&str] = &[
            "bitcoin", "btc", "ethereum", "eth", "crypto", "solana", "sol", "xrp", "doge", "price",
            "token", "coin", "defi",
        ];
        if SPORTS.iter().any(|kw| question.contains(kw)) {
            return "sports";
        }
        if CRYPTO.iter().any(|kw| question.contains(kw)) {
            return "crypto";
        }
        "other"
    }

    pub fn hours_to_resolution(&self) -> f64 {
        let Some(raw) = self.end_date.as_deref() else {
            return f64::INFINITY;
        };
        match DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00")) {
            Ok(end) => {
                let secs = end.timestamp() - Utc::now().timestamp();
                (secs as f64 / 3600.0).max(0.0)
            }
            Err(_) => f64::INFINITY,
        }
    }
}

/// One stored price observation for a YES token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    pub price_yes: f64,
    pub price_no: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

/// An open position, keyed by `(token_id, side)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub token_id: String,
    pub market_question: String,
    pub side: Outcome,
    pub size: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn key(token_id: &str, side: Outcome) -> String {
        format!("{}_{}", token_id, side.as_str())
    }

    pub fn cost_basis(&self) -> f64 {
        self.size * self.avg_entry_price
    }

    pub fn current_value(&self) -> f64 {
        self.size * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.current_value() - self.cost_basis()
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        let basis = self.cost_basis();
        if basis == 0.0 {
            0.0
        } else {
            self.unrealized_pnl() / basis * 100.0
        }
    }
}

/// An append-only ledger row. Realized P&L derives from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub token_id: String,
    pub market_question: String,
    pub side: Outcome,
    pub action: OrderSide,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
    pub order_id: Option<String>,
    pub strategy: Option<String>,
}

/// Aggregate statistics over the trade ledger.
#[derive(Debug, Clone, Serialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub buys: u64,
    pub sells: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
}

/// An exchange order being polled for fills.
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order_id: String,
    pub token_id: String,
    pub market_question: String,
    pub side: Outcome,
    pub order_side: OrderSide,
    pub size: f64,
    pub limit_price: f64,
    pub filled_size: f64,
    pub avg_fill_price: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub stale_after: Duration,
    pub strategy: Option<String>,
}

impl TrackedOrder {
    pub fn remaining_size(&self) -> f64 {
        (self.size - self.filled_size).max(0.0)
    }

    /// Float tolerance on "fully filled": 99.9% counts.
    pub fn is_fully_filled(&self) -> bool {
        self.filled_size >= self.size * 0.999
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.is_fully_filled()
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.stale_after
    }
}

/// A local trigger order (take profit, stop loss, trailing stop).
#[derive(Debug, Clone)]
pub struct AutoOrder {
    pub id: String,
    pub token_id: String,
    pub market_question: String,
    pub order_type: AutoOrderType,
    pub side: Outcome,
    pub size: f64,
    pub trigger_price: f64,
    pub limit_price: Option<f64>,
    pub trailing_percent: Option<f64>,
    pub highest_price: f64,
    pub state: AutoOrderState,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_price: Option<f64>,
    pub linked_order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_variants() {
        assert_eq!(OrderStatus::parse("matched"), Some(OrderStatus::Matched));
        assert_eq!(OrderStatus::parse("FILLED"), Some(OrderStatus::Matched));
        assert_eq!(OrderStatus::parse("CANCELED"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::parse("bogus"), None);
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_position_math() {
        let pos = Position {
            token_id: "tok".into(),
            market_question: "q".into(),
            side: Outcome::Yes,
            size: 100.0,
            avg_entry_price: 0.40,
            current_price: 0.55,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!((pos.cost_basis() - 40.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl() - 15.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl_pct() - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_tracked_order_terminal_by_fill() {
        let mut order = TrackedOrder {
            order_id: "o1".into(),
            token_id: "tok".into(),
            market_question: "q".into(),
            side: Outcome::Yes,
            order_side: OrderSide::Buy,
            size: 100.0,
            limit_price: 0.5,
            filled_size: 0.0,
            avg_fill_price: 0.0,
            status: OrderStatus::Live,
            created_at: Utc::now(),
            last_checked: None,
            stale_after: Duration::minutes(30),
            strategy: None,
        };
        assert!(!order.is_terminal());
        order.filled_size = 99.95;
        assert!(order.is_fully_filled());
        assert!(order.is_terminal());
        assert!((order.remaining_size() - 0.05).abs() < 1e-9);
    }
}
