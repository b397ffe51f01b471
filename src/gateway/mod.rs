//! Exchange access layer.
//!
//! The rest of the bot talks to the exchange through the [`Exchange`] trait,
//! which keeps the tracker, the trigger engine and the strategies testable
//! against an in-memory stub. [`ExchangeGateway`] is the live implementation:
//! one shared read-only CLOB client plus an optional authenticated client,
//! both behind a single token-bucket rate limiter.
//!
//! Failure semantics at this boundary: transport errors and upstream 5xx are
//! caught and logged, read calls return `None` ("retry next cycle"), trading
//! calls return a not-ok ack. Nothing raises across this seam.

pub mod clob;
pub mod markets;
pub mod odds;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::models::OrderSide;
pub use clob::{ClobClient, ClobCredentials, RateLimiter};
pub use markets::MarketFetcher;
pub use odds::OddsClient;

/// One price level of an orderbook.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Normalized orderbook, bids and asks sorted best-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn midpoint(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Best bid/ask spread in basis points. `None` for missing or inverted
    /// books (callers treat that as "skip").
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if bid <= 0.0 || ask <= 0.0 || ask < bid {
            return None;
        }
        let mid = (bid + ask) / 2.0;
        Some((ask - bid) / mid * 10_000.0)
    }
}

/// A limit order to submit.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

/// Submission acknowledgement. Success means the order is LIVE on the book,
/// not that it filled.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

impl OrderAck {
    pub fn accepted(order_id: String) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            error: Some(error.into()),
        }
    }
}

/// One fill reported under an order.
#[derive(Debug, Clone, Copy)]
pub struct FillTrade {
    pub size: f64,
    pub price: f64,
}

/// Order status as reported by the exchange, normalized over upstream
/// field-name variants.
#[derive(Debug, Clone, Default)]
pub struct OrderState {
    pub status: String,
    pub size_matched: f64,
    pub price: Option<f64>,
    pub original_size: Option<f64>,
    pub trades: Vec<FillTrade>,
}

/// The exchange surface the bot depends on.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn has_auth(&self) -> bool;
    async fn get_order_book(&self, token_id: &str) -> Option<OrderBook>;
    async fn get_midpoint(&self, token_id: &str) -> Option<f64>;
    async fn post_order(&self, req: &OrderRequest) -> OrderAck;
    async fn get_order(&self, order_id: &str) -> Option<OrderState>;
    async fn cancel(&self, order_id: &str) -> bool;
    async fn cancel_all(&self) -> u32;
}

/// Live gateway: shared read client + optional authenticated client.
pub struct ExchangeGateway {
    read: ClobClient,
    auth: Option<ClobClient>,
    auth_error: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl ExchangeGateway {
    pub fn new(config: &Config) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.api_rate_limit));
        let read = ClobClient::read_only(&config.clob_host, limiter.clone());

        let (auth, auth_error) = if config.has_credentials() {
            match ClobCredentials::from_env() {
                Some(creds) => (
                    Some(ClobClient::authenticated(
                        &config.clob_host,
                        limiter.clone(),
                        creds,
                        &config.funder_address,
                    )),
                    None,
                ),
                None => {
                    let msg = "CLOB API credentials not set (POLYMARKET_CLOB_API_KEY / \
                               _SECRET / _PASSPHRASE)";
                    warn!("authenticated client unavailable: {msg}");
                    (None, Some(msg.to_string()))
                }
            }
        } else {
            (None, None)
        };

        Self {
            read,
            auth,
            auth_error,
            limiter,
        }
    }

    pub fn auth_error(&self) -> Option<&str> {
        self.auth_error.as_deref()
    }

    /// The global token bucket, shared with the market-listing fetcher so
    /// every outbound call draws from one budget.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub async fn get_last_trade_price(&self, token_id: &str) -> Option<f64> {
        self.read.get_last_trade_price(token_id).await
    }

    pub async fn open_orders(&self) -> Vec<serde_json::Value> {
        match &self.auth {
            Some(client) => client.open_orders().await,
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl Exchange for ExchangeGateway {
    fn has_auth(&self) -> bool {
        self.auth.is_some()
    }

    async fn get_order_book(&self, token_id: &str) -> Option<OrderBook> {
        self.read.get_order_book(token_id).await
    }

    async fn get_midpoint(&self, token_id: &str) -> Option<f64> {
        self.read.get_midpoint(token_id).await
    }

    async fn post_order(&self, req: &OrderRequest) -> OrderAck {
        match &self.auth {
            Some(client) => client.post_order(req).await,
            None => OrderAck::rejected("trading disabled - no authenticated client"),
        }
    }

    async fn get_order(&self, order_id: &str) -> Option<OrderState> {
        self.auth.as_ref()?.get_order(order_id).await
    }

    async fn cancel(&self, order_id: &str) -> bool {
        match &self.auth {
            Some(client) => client.cancel(order_id).await,
            None => false,
        }
    }

    async fn cancel_all(&self) -> u32 {
        match &self.auth {
            Some(client) => client.cancel_all().await,
            None => 0,
        }
    }
}
